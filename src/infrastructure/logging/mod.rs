//! Tracing initialization from `LoggingConfig`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::domain::models::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG`, when set, wins over the configured level. Safe to call
/// once per process; a second call returns an error from the subscriber
/// registry, which is surfaced rather than panicking.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.format == "json" {
        builder.json().try_init().map_err(|err| {
            anyhow::anyhow!("failed to install tracing subscriber: {err}")
        })?;
    } else {
        builder.try_init().map_err(|err| {
            anyhow::anyhow!("failed to install tracing subscriber: {err}")
        })?;
    }
    Ok(())
}
