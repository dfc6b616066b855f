use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::entity::{Entity, EntityBase, EntityType};
use crate::error::{CoreError, Result};
use crate::models::{LoadClient, LoadResult, LoadTestConfig};
use crate::validation::{Rules, Validate};

/// Aggregate root for one load-test execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    #[serde(flatten)]
    pub base: EntityBase,
    pub load_test_config: LoadTestConfig,
    pub load_clients: Vec<LoadClient>,
    pub created_time: DateTime<Utc>,
    /// Scheduled start
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub completed_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hard_stop: bool,
    #[serde(default)]
    pub hard_stop_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_results: Vec<LoadResult>,
}

/// What happened when a LoadResult was offered to a TestRun
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Result appended; `completed` is true when it was the last one expected
    Appended { completed: bool },
    /// This client already reported, nothing changed
    AlreadyPresent,
}

impl TestRun {
    pub fn new(load_test_config: LoadTestConfig, load_clients: Vec<LoadClient>) -> Self {
        let now = Utc::now();
        Self {
            base: EntityBase::new(EntityType::TestRun),
            load_test_config,
            load_clients,
            created_time: now,
            start_time: now,
            completed_time: None,
            hard_stop: false,
            hard_stop_time: None,
            client_results: Vec::new(),
        }
    }

    pub fn is_assigned_to(&self, client_id: &str) -> bool {
        self.load_clients.iter().any(|c| c.base.id == client_id)
    }

    pub fn result_for(&self, client_id: &str) -> Option<&LoadResult> {
        self.client_results.iter().find(|r| r.client_id() == client_id)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_time.is_some()
    }

    /// Set `hard_stop_time` if a stop was requested but never stamped
    pub fn stamp_hard_stop(&mut self, now: DateTime<Utc>) -> bool {
        if self.hard_stop && self.hard_stop_time.is_none() {
            self.hard_stop_time = Some(now.max(self.start_time));
            return true;
        }
        false
    }

    /// Append one client's result
    ///
    /// Idempotent per client: a second result from the same client is
    /// ignored. Once every assigned client has reported, `completed_time` is
    /// set to the latest result completion.
    pub fn append_result(&mut self, result: LoadResult) -> Result<AppendOutcome> {
        let client_id = result.client_id().to_string();

        if !self.is_assigned_to(&client_id) {
            return Err(CoreError::UnassignedClient {
                test_run_id: self.base.id.clone(),
                client_id,
            });
        }
        if self.result_for(&client_id).is_some() {
            return Ok(AppendOutcome::AlreadyPresent);
        }

        self.client_results.push(result);

        let completed = self.client_results.len() == self.load_clients.len();
        if completed && self.completed_time.is_none() {
            let latest = self
                .client_results
                .iter()
                .map(|r| r.completed_time)
                .max()
                .unwrap_or_else(Utc::now);
            self.completed_time = Some(latest.max(self.start_time));
        }

        Ok(AppendOutcome::Appended { completed })
    }
}

impl Entity for TestRun {
    const ENTITY_TYPE: EntityType = EntityType::TestRun;

    fn base(&self) -> &EntityBase {
        &self.base
    }
}

impl Validate for TestRun {
    fn entity_type(&self) -> EntityType {
        EntityType::TestRun
    }

    fn validation_errors(&self) -> Vec<String> {
        let mut rules = Rules::new();

        rules
            .required(&self.base.id, "Id")
            .required(&self.base.partition_key, "PartitionKey")
            .valid_date(&self.created_time, "CreatedTime")
            .check(
                self.start_time >= self.created_time,
                "StartTime",
                "must not be before CreatedTime",
            )
            .check(
                self.completed_time.is_none_or(|t| t >= self.start_time),
                "CompletedTime",
                "must not be before StartTime",
            )
            .check(
                self.hard_stop || self.hard_stop_time.is_none(),
                "HardStopTime",
                "requires HardStop",
            )
            .check(!self.load_clients.is_empty(), "LoadClients", "must not be empty")
            .check(
                self.client_results.len() <= self.load_clients.len(),
                "ClientResults",
                "must not outnumber LoadClients",
            )
            .nested("LoadTestConfig", self.load_test_config.validation_errors());

        let mut seen = HashSet::new();
        for client in &self.load_clients {
            if !seen.insert(client.base.id.as_str()) {
                rules.check(
                    false,
                    "LoadClients",
                    &format!("duplicate load client id {}", client.base.id),
                );
            }
            rules.nested("LoadClients", client.validation_errors());
        }

        let mut reported = HashSet::new();
        for result in &self.client_results {
            rules
                .check(
                    reported.insert(result.client_id()),
                    "ClientResults",
                    "contains more than one result for a load client",
                )
                .nested("ClientResults", result.validation_errors());
        }

        rules.finish()
    }
}
