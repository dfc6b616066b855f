//! Resilience patterns for LodeRunner
//!
//! This crate provides the escalating health checker, retry policies with
//! backoff, a fixed-size slot pool, and process shutdown coordination.

pub mod backoff;
pub mod health;
pub mod pool;
pub mod retry;
pub mod shutdown;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use health::{HealthCheck, HealthChecker, HealthCheckerOptions, HealthSnapshot};
pub use pool::{Slot, SlotPool};
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use shutdown::ShutdownCoordinator;
pub use tokio_util::sync::CancellationToken;
