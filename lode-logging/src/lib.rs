//! Logging setup for LodeRunner
//!
//! All crates log through `tracing`. This crate installs the global
//! subscriber once at process start, in plain text, pretty or JSON form,
//! and provides the worker-scoped span every other record is nested under.

pub mod init;

pub use init::{init_logging_from_config, init_simple_tracing, worker_span};
pub use lode_config::{LogFormat, LogLevel, LoggingConfig};
