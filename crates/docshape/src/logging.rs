//! Logging initialization.
//!
//! Installs a `tracing-subscriber` registry writing to stderr. The filter
//! comes from `RUST_LOG` when set, otherwise from `[logging].level`.
//! Command output (tables, JSON) goes to stdout and is unaffected.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level: '{}'", config.level))
}

/// Install the global subscriber. Call once, at startup.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to install log subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .context("Failed to install log subscriber")?;
    }

    Ok(())
}
