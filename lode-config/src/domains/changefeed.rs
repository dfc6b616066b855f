//! Change feed consumption configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Lease and polling settings for the change dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeFeedConfig {
    /// How long a partition lease is held without renewal
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_lease_duration")]
    pub lease_duration: Duration,

    /// How often unowned or expired leases are claimed
    #[serde(with = "crate::domains::utils::serde_duration_millis", default = "default_lease_acquire_interval")]
    pub lease_acquire_interval: Duration,

    /// Delay between reads of an idle partition
    #[serde(with = "crate::domains::utils::serde_duration_millis", default = "default_feed_poll_interval")]
    pub feed_poll_interval: Duration,

    /// Maximum documents delivered per batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Start partitions without a checkpoint from the first change
    #[serde(default = "crate::domains::utils::default_true")]
    pub start_from_beginning: bool,

    /// Lease group name. Dispatchers sharing a name split the partitions
    /// between them, dispatchers with different names each read every
    /// partition. Empty means the shared default group.
    #[serde(default)]
    pub processor_name: String,
}

impl Default for ChangeFeedConfig {
    fn default() -> Self {
        Self {
            lease_duration: default_lease_duration(),
            lease_acquire_interval: default_lease_acquire_interval(),
            feed_poll_interval: default_feed_poll_interval(),
            max_batch_size: default_max_batch_size(),
            start_from_beginning: true,
            processor_name: String::new(),
        }
    }
}

impl Validatable for ChangeFeedConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_batch_size, "max_batch_size", self.domain_name())?;

        if self.feed_poll_interval.is_zero() {
            return Err(self.validation_error("feed_poll_interval must be greater than 0"));
        }
        // Renewal happens on each poll, so a poll must fit inside a lease
        if self.feed_poll_interval >= self.lease_duration {
            return Err(self.validation_error(format!(
                "feed_poll_interval ({:?}) must be shorter than lease_duration ({:?})",
                self.feed_poll_interval, self.lease_duration
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "changefeed"
    }
}

impl ChangeFeedConfig {
    /// Lease key for a feed partition within this processor's group
    pub fn lease_key(&self, partition: &str) -> String {
        if self.processor_name.is_empty() {
            partition.to_string()
        } else {
            format!("{}.{}", self.processor_name, partition)
        }
    }
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(15)
}

fn default_lease_acquire_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_feed_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_max_batch_size() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_key_is_scoped_by_processor_name() {
        let mut config = ChangeFeedConfig::default();
        assert_eq!(config.lease_key("TestRun"), "TestRun");

        config.processor_name = "client-1".to_string();
        assert_eq!(config.lease_key("TestRun"), "client-1.TestRun");
    }
}
