//! Partial-update payloads
//!
//! Each payload lists exactly which fields of its entity can be changed by a
//! partial update. `merge_into` copies the fields that are present and
//! returns the names of the ones that actually changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{LoadClient, LoadTestConfig, TestRun};

/// Mergeable subset of a [`TestRun`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestRunPayload {
    pub name: Option<String>,
    pub load_test_config: Option<LoadTestConfig>,
    pub load_clients: Option<Vec<LoadClient>>,
    pub start_time: Option<DateTime<Utc>>,
    pub hard_stop: Option<bool>,
}

impl TestRunPayload {
    /// Payload that only requests a HardStop
    pub fn hard_stop() -> Self {
        Self {
            hard_stop: Some(true),
            ..Self::default()
        }
    }

    pub fn merge_into(&self, run: &mut TestRun, now: DateTime<Utc>) -> Vec<&'static str> {
        let mut changed = Vec::new();

        merge_field(&mut run.base.name, &self.name, "Name", &mut changed);
        merge_field(
            &mut run.load_test_config,
            &self.load_test_config,
            "LoadTestConfig",
            &mut changed,
        );
        merge_field(&mut run.load_clients, &self.load_clients, "LoadClients", &mut changed);
        merge_field(&mut run.start_time, &self.start_time, "StartTime", &mut changed);
        merge_field(&mut run.hard_stop, &self.hard_stop, "HardStop", &mut changed);

        if run.stamp_hard_stop(now) {
            changed.push("HardStopTime");
        }

        changed
    }
}

/// Mergeable subset of a [`LoadTestConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadTestConfigPayload {
    pub name: Option<String>,
    pub files: Option<Vec<String>>,
    pub strict_json: Option<bool>,
    pub base_url: Option<String>,
    pub verbose_errors: Option<bool>,
    pub randomize: Option<bool>,
    pub timeout: Option<u64>,
    pub server: Option<Vec<String>>,
    pub tag: Option<String>,
    pub sleep: Option<u64>,
    pub run_loop: Option<bool>,
    pub duration: Option<u64>,
    pub max_errors: Option<u32>,
    pub delay_start: Option<u64>,
    pub dry_run: Option<bool>,
    pub max_concurrent: Option<usize>,
}

impl LoadTestConfigPayload {
    pub fn merge_into(&self, config: &mut LoadTestConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();

        merge_field(&mut config.base.name, &self.name, "Name", &mut changed);
        merge_field(&mut config.files, &self.files, "Files", &mut changed);
        merge_field(&mut config.strict_json, &self.strict_json, "StrictJson", &mut changed);
        merge_field(&mut config.base_url, &self.base_url, "BaseUrl", &mut changed);
        merge_field(
            &mut config.verbose_errors,
            &self.verbose_errors,
            "VerboseErrors",
            &mut changed,
        );
        merge_field(&mut config.randomize, &self.randomize, "Randomize", &mut changed);
        merge_field(&mut config.timeout, &self.timeout, "Timeout", &mut changed);
        merge_field(&mut config.server, &self.server, "Server", &mut changed);
        merge_field(&mut config.tag, &self.tag, "Tag", &mut changed);
        merge_field(&mut config.sleep, &self.sleep, "Sleep", &mut changed);
        merge_field(&mut config.run_loop, &self.run_loop, "RunLoop", &mut changed);
        merge_field(&mut config.duration, &self.duration, "Duration", &mut changed);
        merge_field(&mut config.max_errors, &self.max_errors, "MaxErrors", &mut changed);
        merge_field(&mut config.delay_start, &self.delay_start, "DelayStart", &mut changed);
        merge_field(&mut config.dry_run, &self.dry_run, "DryRun", &mut changed);
        merge_field(
            &mut config.max_concurrent,
            &self.max_concurrent,
            "MaxConcurrent",
            &mut changed,
        );

        changed
    }
}

fn merge_field<T: Clone + PartialEq>(
    target: &mut T,
    source: &Option<T>,
    name: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if let Some(value) = source {
        if target != value {
            *target = value.clone();
            changed.push(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> TestRun {
        TestRun::new(
            LoadTestConfig::new(vec!["http://x".into()], vec!["f.json".into()]),
            vec![LoadClient::new("args")],
        )
    }

    #[test]
    fn test_hard_stop_payload_stamps_time() {
        let mut run = run();
        let changed = TestRunPayload::hard_stop().merge_into(&mut run, Utc::now());

        assert_eq!(changed, vec!["HardStop", "HardStopTime"]);
        assert!(run.hard_stop);
        assert!(run.hard_stop_time.is_some());

        // Re-applying is a no-op
        assert!(TestRunPayload::hard_stop()
            .merge_into(&mut run, Utc::now())
            .is_empty());
    }

    #[test]
    fn test_absent_fields_are_left_alone() {
        let mut run = run();
        let before = run.clone();
        let payload: TestRunPayload = serde_json::from_str(r#"{"name":"nightly"}"#).unwrap();

        assert_eq!(payload.merge_into(&mut run, Utc::now()), vec!["Name"]);
        assert_eq!(run.base.name, "nightly");
        assert_eq!(run.load_clients, before.load_clients);
        assert_eq!(run.start_time, before.start_time);
    }

    #[test]
    fn test_config_payload_reports_only_real_changes() {
        let mut config = LoadTestConfig::default();
        let payload = LoadTestConfigPayload {
            timeout: Some(30),
            sleep: Some(250),
            run_loop: Some(true),
            ..Default::default()
        };

        assert_eq!(payload.merge_into(&mut config), vec!["Sleep", "RunLoop"]);
        assert_eq!(config.sleep, 250);
        assert!(config.run_loop);
    }
}
