//! Store connectivity health check configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Escalating health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Seconds between checks while healthy
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_interval")]
    pub interval: Duration,

    /// Failed checks tolerated before the worker is cancelled
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Go back to the full interval after a passing check
    #[serde(default = "crate::domains::utils::default_true")]
    pub restore_interval: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
            retry_limit: default_retry_limit(),
            restore_interval: true,
        }
    }
}

impl Validatable for HealthConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.retry_limit, "retry_limit", self.domain_name())?;
        if self.interval.is_zero() {
            return Err(self.validation_error("interval must be greater than 0"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "health"
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_limit() -> u32 {
    3
}
