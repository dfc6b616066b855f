//! Configuration loading and environment variable handling

use crate::domains::LodeConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "LODE".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<LodeConfig> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let mut config: LodeConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<LodeConfig> {
        let mut config = LodeConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<LodeConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut LodeConfig) -> ConfigResult<()> {
        self.apply_worker_overrides(&mut config.worker)?;
        self.apply_changefeed_overrides(&mut config.changefeed)?;
        self.apply_engine_overrides(&mut config.engine)?;
        self.apply_health_overrides(&mut config.health)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_worker_overrides(
        &self,
        config: &mut crate::domains::worker::WorkerConfig,
    ) -> ConfigResult<()> {
        if let Ok(region) = self.get_env_var("WORKER_REGION") {
            config.region = region;
        }

        if let Ok(zone) = self.get_env_var("WORKER_ZONE") {
            config.zone = zone;
        }

        if let Ok(prometheus) = self.get_env_var("WORKER_PROMETHEUS") {
            config.prometheus = self.parse_value("WORKER_PROMETHEUS", &prometheus)?;
        }

        if let Ok(seconds) = self.get_env_var("STATUS_UPDATE_INTERVAL") {
            config.status_update_interval =
                Duration::from_secs(self.parse_value("STATUS_UPDATE_INTERVAL", &seconds)?);
        }

        if let Ok(seconds) = self.get_env_var("POLLING_INTERVAL") {
            config.polling_interval =
                Duration::from_secs(self.parse_value("POLLING_INTERVAL", &seconds)?);
        }

        Ok(())
    }

    fn apply_changefeed_overrides(
        &self,
        config: &mut crate::domains::changefeed::ChangeFeedConfig,
    ) -> ConfigResult<()> {
        if let Ok(seconds) = self.get_env_var("LEASE_DURATION") {
            config.lease_duration = Duration::from_secs(self.parse_value("LEASE_DURATION", &seconds)?);
        }

        if let Ok(name) = self.get_env_var("PROCESSOR_NAME") {
            config.processor_name = name;
        }

        Ok(())
    }

    fn apply_engine_overrides(
        &self,
        config: &mut crate::domains::engine::EngineConfig,
    ) -> ConfigResult<()> {
        if let Ok(dir) = self.get_env_var("TEST_FILES_DIR") {
            config.test_files_dir = dir;
        }

        if let Ok(path) = self.get_env_var("PERF_TARGETS_FILE") {
            config.perf_targets_file = Some(path);
        }

        Ok(())
    }

    fn apply_health_overrides(
        &self,
        config: &mut crate::domains::health::HealthConfig,
    ) -> ConfigResult<()> {
        if let Ok(seconds) = self.get_env_var("HEALTH_INTERVAL") {
            config.interval = Duration::from_secs(self.parse_value("HEALTH_INTERVAL", &seconds)?);
        }

        if let Ok(limit) = self.get_env_var("HEALTH_RETRY_LIMIT") {
            config.retry_limit = self.parse_value("HEALTH_RETRY_LIMIT", &limit)?;
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn parse_value<T>(&self, name: &str, value: &str) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        value
            .trim()
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
