//! Aggregate outcome of one load test

use chrono::{DateTime, Utc};
use lode_core::{LoadClient, LoadResult};

/// Counters and timing of a finished (or stopped) run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub start_time: DateTime<Utc>,
    pub completed_time: DateTime<Utc>,
    pub total_requests: u64,
    /// Transport failures plus failed response validations
    pub failed_requests: u64,
    /// Stopped by the cancellation token before finishing on its own
    pub cancelled: bool,
}

impl RunSummary {
    /// A run that issued nothing
    pub fn empty(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            completed_time: Utc::now().max(start_time),
            total_requests: 0,
            failed_requests: 0,
            cancelled: false,
        }
    }

    pub fn successful_requests(&self) -> u64 {
        self.total_requests.saturating_sub(self.failed_requests)
    }

    pub fn into_load_result(self, load_client: LoadClient) -> LoadResult {
        LoadResult::new(
            load_client,
            self.start_time,
            self.completed_time,
            self.total_requests,
            self.failed_requests,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::Validate;

    #[test]
    fn test_into_load_result_keeps_counters_consistent() {
        let start = Utc::now();
        let summary = RunSummary {
            start_time: start,
            completed_time: start,
            total_requests: 12,
            failed_requests: 5,
            cancelled: false,
        };
        assert_eq!(summary.successful_requests(), 7);

        let result = summary.into_load_result(LoadClient::new("args"));
        assert_eq!(result.total_requests, 12);
        assert_eq!(result.successful_requests, 7);
        assert_eq!(result.failed_requests, 5);
        assert!(result.is_valid());
    }

    #[test]
    fn test_empty_summary() {
        let start = Utc::now();
        let summary = RunSummary::empty(start);
        assert_eq!(summary.total_requests, 0);
        assert!(summary.completed_time >= start);
        assert!(!summary.cancelled);
    }
}
