//! Typed entity services over a [`crate::DocumentStore`]

mod base;
mod client_status;
mod load_test_config;
mod test_run;

pub use base::EntityService;
pub use client_status::ClientStatusService;
pub use load_test_config::LoadTestConfigService;
pub use test_run::TestRunService;
