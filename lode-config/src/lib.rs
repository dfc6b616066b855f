//! Domain-driven configuration management for LodeRunner
//!
//! Configuration is split by functional domain (worker, store, change feed,
//! engine, health, logging). Every domain has serde defaults, validation,
//! and environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    changefeed::ChangeFeedConfig,
    engine::EngineConfig,
    health::HealthConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    store::StoreConfig,
    worker::WorkerConfig,
    LodeConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration, serde_duration_millis};
