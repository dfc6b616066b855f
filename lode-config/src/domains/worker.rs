//! Worker process configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Worker identity, liveness and assignment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Region reported in the LoadClient snapshot
    #[serde(default = "default_region")]
    pub region: String,

    /// Zone reported in the LoadClient snapshot
    #[serde(default = "default_zone")]
    pub zone: String,

    /// Whether request metrics are emitted
    #[serde(default = "crate::domains::utils::default_false")]
    pub prometheus: bool,

    /// Startup arguments recorded on the LoadClient
    #[serde(default = "default_startup_args")]
    pub startup_args: String,

    /// Seconds a ClientStatus survives without a refreshing write
    #[serde(default = "default_client_status_ttl")]
    pub client_status_ttl: i64,

    /// How often the current status is re-persisted
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_status_update_interval")]
    pub status_update_interval: Duration,

    /// How often assigned runs are re-scanned from the store
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_polling_interval")]
    pub polling_interval: Duration,

    /// Only runs scheduled to start before now plus this window are executed
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_scheduling_window")]
    pub scheduling_window: Duration,

    /// Consecutive failed status writes before the worker shuts down
    #[serde(default = "default_max_status_update_failures")]
    pub max_status_update_failures: u32,

    /// Attempts for the optimistic LoadResult append
    #[serde(default = "default_result_append_attempts")]
    pub result_append_attempts: u32,

    /// Initial backoff between append attempts
    #[serde(with = "crate::domains::utils::serde_duration_millis", default = "default_result_append_delay")]
    pub result_append_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            zone: default_zone(),
            prometheus: false,
            startup_args: default_startup_args(),
            client_status_ttl: default_client_status_ttl(),
            status_update_interval: default_status_update_interval(),
            polling_interval: default_polling_interval(),
            scheduling_window: default_scheduling_window(),
            max_status_update_failures: default_max_status_update_failures(),
            result_append_attempts: default_result_append_attempts(),
            result_append_delay: default_result_append_delay(),
        }
    }
}

impl Validatable for WorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.region, "region", self.domain_name())?;
        validate_required_string(&self.zone, "zone", self.domain_name())?;
        validate_required_string(&self.startup_args, "startup_args", self.domain_name())?;
        validate_positive(self.client_status_ttl, "client_status_ttl", self.domain_name())?;
        validate_positive(
            self.max_status_update_failures,
            "max_status_update_failures",
            self.domain_name(),
        )?;
        validate_positive(
            self.result_append_attempts,
            "result_append_attempts",
            self.domain_name(),
        )?;

        if self.status_update_interval.is_zero() {
            return Err(self.validation_error("status_update_interval must be greater than 0"));
        }
        if self.polling_interval.is_zero() {
            return Err(self.validation_error("polling_interval must be greater than 0"));
        }

        // A status refreshed less often than it expires would flap out of the store
        if self.status_update_interval.as_secs() as i64 >= self.client_status_ttl {
            return Err(self.validation_error(format!(
                "status_update_interval ({}s) must be shorter than client_status_ttl ({}s)",
                self.status_update_interval.as_secs(),
                self.client_status_ttl
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "worker"
    }
}

fn default_region() -> String {
    "Central".to_string()
}

fn default_zone() -> String {
    "az-central-us".to_string()
}

fn default_startup_args() -> String {
    "--mode Client".to_string()
}

fn default_client_status_ttl() -> i64 {
    60
}

fn default_status_update_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_polling_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_scheduling_window() -> Duration {
    Duration::from_secs(60)
}

fn default_max_status_update_failures() -> u32 {
    3
}

fn default_result_append_attempts() -> u32 {
    5
}

fn default_result_append_delay() -> Duration {
    Duration::from_millis(50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_must_beat_ttl() {
        let config = WorkerConfig {
            status_update_interval: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_durations_are_seconds() {
        let config: WorkerConfig =
            serde_yaml::from_str("status_update_interval: 5\nresult_append_delay: 10\n").unwrap();
        assert_eq!(config.status_update_interval, Duration::from_secs(5));
        assert_eq!(config.result_append_delay, Duration::from_millis(10));
        assert_eq!(config.zone, "az-central-us");
    }
}
