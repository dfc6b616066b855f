//! Persisted domain documents

mod client_status;
mod load_client;
mod load_result;
mod load_test_config;
mod test_run;

pub use client_status::ClientStatus;
pub use load_client::LoadClient;
pub use load_result::LoadResult;
pub use load_test_config::LoadTestConfig;
pub use test_run::{AppendOutcome, TestRun};
