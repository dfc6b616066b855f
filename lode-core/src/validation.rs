//! Entity validation traits and rule helpers
//!
//! Validators collect every broken rule as `"<Field> - <message>"` instead of
//! stopping at the first one, so a rejected document reports all of its
//! problems at once.

use chrono::{DateTime, TimeZone, Utc};

use crate::constants::MIN_VALID_YEAR;
use crate::entity::EntityType;
use crate::error::ValidationError;

/// Trait for entities validated before persistence
pub trait Validate {
    /// Entity type used for error reporting
    fn entity_type(&self) -> EntityType;

    /// Every broken rule, empty when valid
    fn validation_errors(&self) -> Vec<String>;

    fn validate(&self) -> Result<(), ValidationError> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(self.entity_type(), errors))
        }
    }

    fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }
}

/// Accumulator for rule failures
#[derive(Debug, Default)]
pub struct Rules {
    errors: Vec<String>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` against `field` when `ok` is false
    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(format!("{} - {}", field, message));
        }
        self
    }

    pub fn required(&mut self, value: &str, field: &str) -> &mut Self {
        self.check(!value.trim().is_empty(), field, "must not be empty")
    }

    /// Timestamps before 1990 are treated as unset
    pub fn valid_date(&mut self, value: &DateTime<Utc>, field: &str) -> &mut Self {
        self.check(*value > min_valid_date(), field, "must be a valid date")
    }

    /// Pull in a nested entity's errors under `prefix`
    pub fn nested(&mut self, prefix: &str, errors: Vec<String>) -> &mut Self {
        self.errors
            .extend(errors.into_iter().map(|e| format!("{}.{}", prefix, e)));
        self
    }

    pub fn finish(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}

pub fn min_valid_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(MIN_VALID_YEAR, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Validate an absolute http(s) URL
pub fn is_http_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
