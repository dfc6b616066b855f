use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityBase, EntityType};
use crate::validation::{is_http_url, Rules, Validate};

/// Request-execution parameters for a load test
///
/// A TestRun embeds its own copy, so later edits to a stored config never
/// reach a run that is already executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadTestConfig {
    #[serde(flatten)]
    pub base: EntityBase,

    /// Request definition files, executed in file order
    pub files: Vec<String>,

    pub strict_json: bool,

    /// When set, request files are downloaded relative to this URL
    pub base_url: String,

    pub verbose_errors: bool,

    /// Pick requests uniformly at random in run-loop mode
    pub randomize: bool,

    /// Per-request timeout in seconds
    pub timeout: u64,

    /// Target servers
    pub server: Vec<String>,

    pub tag: String,

    /// Milliseconds between requests
    pub sleep: u64,

    pub run_loop: bool,

    /// Seconds to run in run-loop mode, 0 for unbounded
    pub duration: u64,

    pub max_errors: u32,

    /// Seconds to wait before the first request
    pub delay_start: u64,

    pub dry_run: bool,

    /// Upper bound on in-flight requests in run-loop mode
    pub max_concurrent: usize,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            base: EntityBase::new(EntityType::LoadTestConfig),
            files: Vec::new(),
            strict_json: false,
            base_url: String::new(),
            verbose_errors: false,
            randomize: false,
            timeout: 30,
            server: Vec::new(),
            tag: String::new(),
            sleep: 0,
            run_loop: false,
            duration: 0,
            max_errors: 10,
            delay_start: 0,
            dry_run: false,
            max_concurrent: 100,
        }
    }
}

impl LoadTestConfig {
    pub fn new(server: Vec<String>, files: Vec<String>) -> Self {
        Self {
            server,
            files,
            ..Self::default()
        }
    }
}

impl Entity for LoadTestConfig {
    const ENTITY_TYPE: EntityType = EntityType::LoadTestConfig;

    fn base(&self) -> &EntityBase {
        &self.base
    }
}

impl Validate for LoadTestConfig {
    fn entity_type(&self) -> EntityType {
        EntityType::LoadTestConfig
    }

    fn validation_errors(&self) -> Vec<String> {
        let mut rules = Rules::new();

        rules
            .required(&self.base.id, "Id")
            .required(&self.base.partition_key, "PartitionKey")
            .check(!self.files.is_empty(), "Files", "Files collection is required.")
            .check(!self.server.is_empty(), "Server", "Server collection is required.")
            .check(self.timeout > 0, "Timeout", "must be greater than 0")
            .check(self.max_concurrent > 0, "MaxConcurrent", "must be greater than 0")
            .check(self.max_errors > 0, "MaxErrors", "must be greater than 0")
            .check(
                self.duration == 0 || self.run_loop,
                "Duration",
                "RunLoop must be true to use Duration",
            )
            .check(
                !self.randomize || self.run_loop,
                "Randomize",
                "RunLoop must be true to use Randomize",
            );

        for server in &self.server {
            rules.check(is_http_url(server), "Server", "must be an absolute http(s) URL");
        }
        for file in &self.files {
            rules.required(file, "Files");
        }
        if !self.base_url.is_empty() {
            rules.check(is_http_url(&self.base_url), "BaseUrl", "must be an absolute http(s) URL");
        }

        rules.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoadTestConfig {
        LoadTestConfig::new(vec!["http://localhost:8080".into()], vec!["baseline.json".into()])
    }

    #[test]
    fn test_default_values() {
        let c = LoadTestConfig::default();
        assert_eq!(c.timeout, 30);
        assert_eq!(c.max_errors, 10);
        assert_eq!(c.max_concurrent, 100);
        assert_eq!(c.base.partition_key, "LoadTestConfig");
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_duration_and_random_require_run_loop() {
        let mut c = config();
        c.duration = 60;
        c.randomize = true;
        let err = c.validate().unwrap_err();
        assert!(err.has_field("Duration"));
        assert!(err.has_field("Randomize"));

        c.run_loop = true;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_missing_collections_and_bad_server() {
        let mut c = LoadTestConfig::default();
        assert!(c.validate().unwrap_err().has_field("Files"));

        c.files = vec!["a.json".into()];
        c.server = vec!["localhost".into()];
        assert!(c.validate().unwrap_err().has_field("Server"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: LoadTestConfig = serde_json::from_str(
            r#"{"id":"c1","partitionKey":"LoadTestConfig","entityType":"LoadTestConfig",
                "server":["http://x"],"files":["f.json"],"runLoop":true,"sleep":5}"#,
        )
        .unwrap();
        assert_eq!(c.base.id, "c1");
        assert_eq!(c.sleep, 5);
        assert_eq!(c.timeout, 30);
        assert!(c.run_loop);
    }
}
