use anyhow::Result;
use lode_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Initialize logging from configuration
///
/// `RUST_LOG` still wins over the configured level when it is set.
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(config.level.as_str(), true);

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .pretty()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_current_span(true)
            .flatten_event(true)
            .try_init(),
    };

    // Use try_init to avoid panic if global subscriber already set
    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_filter(log_level, false);

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Span carrying the worker identity, entered by the worker for its lifetime
pub fn worker_span(client_id: &str, region: &str, zone: &str) -> tracing::Span {
    tracing::info_span!("worker", client_id = %client_id, region = %region, zone = %zone)
}

fn build_filter(level: &str, prefer_env: bool) -> EnvFilter {
    if prefer_env {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }

    EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
