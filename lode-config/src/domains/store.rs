//! Document store configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// In-memory document store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How often expired documents are swept
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Validatable for StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.cleanup_interval.is_zero() {
            return Err(self.validation_error("cleanup_interval must be greater than 0"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "store"
    }
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5)
}
