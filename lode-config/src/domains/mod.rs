//! Domain-specific configuration modules

pub mod changefeed;
pub mod engine;
pub mod health;
pub mod logging;
pub mod store;
pub mod utils;
pub mod worker;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main LodeRunner configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LodeConfig {
    /// Worker identity, status refresh and assignment settings
    pub worker: worker::WorkerConfig,

    /// Document store settings
    pub store: store::StoreConfig,

    /// Change feed lease and polling settings
    pub changefeed: changefeed::ChangeFeedConfig,

    /// Load engine settings
    pub engine: engine::EngineConfig,

    /// Store connectivity health check
    pub health: health::HealthConfig,

    /// Logging configuration
    pub logging: logging::LoggingConfig,
}

impl LodeConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.worker.validate()?;
        self.store.validate()?;
        self.changefeed.validate()?;
        self.engine.validate()?;
        self.health.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        serde_yaml::to_string(&Self::default()).unwrap_or_default()
    }
}
