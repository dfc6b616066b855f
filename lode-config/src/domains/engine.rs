//! Load engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};

/// Settings shared by every load test a worker executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory request files are read from when no base URL is given
    #[serde(default = "default_test_files_dir")]
    pub test_files_dir: String,

    /// Optional JSON file mapping categories to quartile thresholds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perf_targets_file: Option<String>,

    /// User agent product token, the crate version is appended
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Idle pooled connections are dropped after this long, 0 keeps the reqwest default
    #[serde(with = "crate::domains::utils::serde_duration", default)]
    pub client_refresh: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            test_files_dir: default_test_files_dir(),
            perf_targets_file: None,
            user_agent: default_user_agent(),
            client_refresh: Duration::ZERO,
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.test_files_dir, "test_files_dir", self.domain_name())?;
        validate_required_string(&self.user_agent, "user_agent", self.domain_name())?;

        if let Some(path) = &self.perf_targets_file {
            validate_required_string(path, "perf_targets_file", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}

fn default_test_files_dir() -> String {
    "TestFiles".to_string()
}

fn default_user_agent() -> String {
    "l8r".to_string()
}
