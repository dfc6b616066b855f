//! Per-request metric observations

/// Labels attached to one duration observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabels {
    pub status_category: &'static str,
    pub mode: String,
    pub server: String,
    pub failed: bool,
    pub zone: String,
    pub region: String,
}

/// Destination for request duration observations
pub trait MetricsSink: Send + Sync {
    fn record_observation(&self, labels: &MetricLabels, duration_ms: f64);
}

/// Bucket an HTTP status into a metric label
pub fn status_category(status_code: u16) -> &'static str {
    match status_code {
        500.. => "Error",
        429 => "Retry",
        400.. => "Warn",
        _ => "OK",
    }
}

/// Map a request's category and path onto a metric mode label
pub fn request_mode(category: &str, path: &str) -> String {
    let path = path.to_lowercase();
    let lower = category.to_lowercase();

    if path.contains("healthz") {
        return "Healthz".to_string();
    }

    let is_query = ["Genre", "Rating", "Year"]
        .iter()
        .any(|prefix| category.starts_with(prefix))
        || path.contains("genres")
        || lower.starts_with("search")
        || lower.starts_with("paged");

    if is_query {
        "Query".to_string()
    } else if category == "DirectRead" {
        "Direct".to_string()
    } else {
        category.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_category() {
        assert_eq!(status_category(200), "OK");
        assert_eq!(status_category(302), "OK");
        assert_eq!(status_category(404), "Warn");
        assert_eq!(status_category(429), "Retry");
        assert_eq!(status_category(500), "Error");
        assert_eq!(status_category(503), "Error");
    }

    #[test]
    fn test_request_mode() {
        assert_eq!(request_mode("Static", "/HealthZ/ietf"), "Healthz");
        assert_eq!(request_mode("Genre", "/api/movies?genre=action"), "Query");
        assert_eq!(request_mode("", "/api/genres"), "Query");
        assert_eq!(request_mode("SearchMovies", "/api/movies?q=ring"), "Query");
        assert_eq!(request_mode("PagedActors", "/api/actors?pageNumber=2"), "Query");
        assert_eq!(request_mode("DirectRead", "/api/movies/tt0133093"), "Direct");
        assert_eq!(request_mode("Static", "/index.html"), "Static");
        assert_eq!(request_mode("", "/"), "");
    }
}
