//! Error types for load test setup

use lode_http::HttpError;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failures that prevent a load test from starting
///
/// Errors of individual requests are never surfaced here; they are
/// counted in the [`crate::RunSummary`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("HTTP setup failed: {0}")]
    Http(#[from] HttpError),

    #[error("Cannot load performance targets from {path}: {message}")]
    PerfTargets { path: String, message: String },

    #[error("Invalid load test configuration: {0}")]
    InvalidConfig(String),
}
