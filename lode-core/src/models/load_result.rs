use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::models::LoadClient;
use crate::validation::{Rules, Validate};

/// One worker's outcome for a TestRun
///
/// Appended once to the owning TestRun and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub load_client: LoadClient,
    pub start_time: DateTime<Utc>,
    pub completed_time: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LoadResult {
    /// Build a result from totals; successes are derived so the counters always add up
    pub fn new(
        load_client: LoadClient,
        start_time: DateTime<Utc>,
        completed_time: DateTime<Utc>,
        total_requests: u64,
        failed_requests: u64,
    ) -> Self {
        let failed_requests = failed_requests.min(total_requests);
        Self {
            load_client,
            start_time,
            completed_time,
            total_requests,
            successful_requests: total_requests - failed_requests,
            failed_requests,
            error_message: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn client_id(&self) -> &str {
        &self.load_client.base.id
    }
}

impl Validate for LoadResult {
    fn entity_type(&self) -> EntityType {
        EntityType::LoadResult
    }

    fn validation_errors(&self) -> Vec<String> {
        Rules::new()
            .nested("LoadClient", self.load_client.validation_errors())
            .check(
                self.total_requests == self.successful_requests + self.failed_requests,
                "TotalRequests",
                "must equal SuccessfulRequests + FailedRequests",
            )
            .check(
                self.completed_time >= self.start_time,
                "CompletedTime",
                "must not be before StartTime",
            )
            .finish()
    }
}
