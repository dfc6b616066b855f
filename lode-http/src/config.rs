//! HTTP transport configuration

use lode_config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one transport, built per test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout
    pub timeout: Duration,

    /// Full user agent header value
    pub user_agent: String,

    /// Drop idle pooled connections after this long
    pub client_refresh: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: user_agent("l8r"),
            client_refresh: None,
        }
    }
}

impl HttpConfig {
    /// Combine worker-wide engine settings with a test run's timeout
    pub fn from_engine(engine: &EngineConfig, timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.max(1)),
            user_agent: user_agent(&engine.user_agent),
            client_refresh: (!engine.client_refresh.is_zero()).then_some(engine.client_refresh),
        }
    }
}

fn user_agent(product: &str) -> String {
    format!("{}/{}", product, env!("CARGO_PKG_VERSION"))
}
