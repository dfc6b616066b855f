//! LodeRunner load generation engine
//!
//! Executes a [`lode_core::LoadTestConfig`] against its target servers,
//! either as a single sweep through the request list or as continuous,
//! concurrency-bounded streams. Every request is timed, validated,
//! classified against an optional performance target and logged.

pub mod engine;
pub mod error;
pub mod metrics;
pub mod perf;
pub mod runner;
pub mod summary;

// Re-export main types
pub use engine::{ClientContext, LoadEngine};
pub use error::{EngineError, EngineResult};
pub use metrics::{request_mode, status_category, MetricLabels, MetricsSink};
pub use perf::{quartile, PerfLog, PerfTargets, TargetThresholds};
pub use runner::{HttpLoadRunner, LoadRunner};
pub use summary::RunSummary;
