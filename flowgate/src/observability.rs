//! Tracing initialization

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Initialize the tracing subscriber.
///
/// Logs are JSON-structured; the filter comes from `RUST_LOG` when set,
/// otherwise from the configured log level.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .init();

    tracing::info!(
        mode = %config.server.mode,
        port = config.server.port,
        "tracing initialized"
    );
}
