//! Minimal response checks

use serde::{Deserialize, Serialize};

use crate::transport::HttpResponse;

/// Expectations attached to a request definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseValidation {
    pub status_code: u16,
    /// Expected media type prefix of the Content-Type header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Substrings the body must contain
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,
}

impl Default for ResponseValidation {
    fn default() -> Self {
        Self {
            status_code: 200,
            content_type: None,
            contains: Vec::new(),
        }
    }
}

/// Outcome of one request
///
/// `failed` means no usable response arrived (transport error, timeout);
/// `errors` lists every failed expectation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub failed: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            failed: true,
            errors: vec![format!("Exception: {}", message.into())],
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.failed && self.errors.is_empty()
    }
}

pub fn validate_response(expected: &ResponseValidation, response: &HttpResponse) -> ValidationResult {
    let mut errors = Vec::new();

    if response.status != expected.status_code {
        errors.push(format!(
            "StatusCode: {} Expected: {}",
            response.status, expected.status_code
        ));
    }

    if let Some(content_type) = &expected.content_type {
        let actual = response.content_type.as_deref().unwrap_or_default();
        if !actual.starts_with(content_type.as_str()) {
            errors.push(format!("ContentType: {} Expected: {}", actual, content_type));
        }
    }

    // Body checks only make sense when the status matched
    if errors.is_empty() {
        for needle in &expected.contains {
            if !response.body.contains(needle.as_str()) {
                errors.push(format!("Contains: {}", needle));
            }
        }
    }

    ValidationResult {
        failed: false,
        errors,
    }
}
