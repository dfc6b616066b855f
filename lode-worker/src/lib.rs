//! LodeRunner worker
//!
//! A worker keeps its `ClientStatus` record alive in the shared store,
//! listens to the change feed for TestRuns assigned to it, executes them
//! with the load engine and appends its `LoadResult` to each run.

pub mod coordinator;
pub mod error;
pub mod liveness;
pub mod service;

pub use coordinator::AssignmentCoordinator;
pub use error::{WorkerError, WorkerResult};
pub use liveness::LivenessTracker;
pub use service::WorkerService;
