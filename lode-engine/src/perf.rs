//! Performance targets and per-request perf records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// Ascending duration thresholds (ms) for one request category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetThresholds {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub quartiles: Vec<f64>,
}

/// Category name to thresholds, as read from the perf targets file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerfTargets(HashMap<String, TargetThresholds>);

impl PerfTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: impl Into<String>, quartiles: Vec<f64>) {
        let category = category.into();
        self.0.insert(
            category.clone(),
            TargetThresholds {
                category,
                quartiles,
            },
        );
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub async fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let error = |message: String| EngineError::PerfTargets {
            path: path.display().to_string(),
            message,
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| error(e.to_string()))?;
        Self::from_json(&content).map_err(|e| error(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Quartile of `duration_ms` for `category`, if a usable target exists
    pub fn quartile(&self, category: &str, duration_ms: f64) -> Option<u32> {
        let target = self.0.get(category)?;
        if target.category.trim().is_empty() {
            return None;
        }
        quartile(&target.quartiles, duration_ms)
    }
}

/// 1-based bucket of `duration_ms` against ascending `thresholds`
///
/// The first threshold the duration does not exceed gives the bucket;
/// exceeding all of them gives `thresholds.len() + 1`. No thresholds, no
/// bucket.
pub fn quartile(thresholds: &[f64], duration_ms: f64) -> Option<u32> {
    if thresholds.is_empty() {
        return None;
    }

    let bucket = thresholds
        .iter()
        .position(|&limit| duration_ms <= limit)
        .unwrap_or(thresholds.len());
    Some(bucket as u32 + 1)
}

/// Everything recorded about one executed request
#[derive(Debug, Clone, PartialEq)]
pub struct PerfLog {
    pub date: DateTime<Utc>,
    pub server: String,
    pub verb: String,
    pub path: String,
    pub status_code: u16,
    pub category: String,
    pub duration_ms: f64,
    pub content_length: u64,
    pub correlation_id: String,
    pub quartile: Option<u32>,
    /// No usable response arrived
    pub failed: bool,
    /// Response arrived and met every expectation
    pub validated: bool,
    pub errors: Vec<String>,
}

impl PerfLog {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Counted against the run's failures
    pub fn is_failure(&self) -> bool {
        self.failed || !self.validated
    }

    /// Up to five error details joined by tabs
    pub fn error_details(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .take(5)
                .map(|e| e.trim())
                .collect::<Vec<_>>()
                .join("\t"),
        )
    }
}
