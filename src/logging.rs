//! Logging initialization
//!
//! Structured logging through `tracing`, with pretty or JSON console
//! output selected by configuration and an `EnvFilter` that respects
//! `RUST_LOG` overrides.

use std::io;

use anyhow::{Context, Result};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::{config::LoggingConfig, error::ScanError};

/// Initialize the logging system with defaults
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize logging with specific configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = create_env_filter(&config.level)?;

    let registry = Registry::default().with(env_filter);

    match config.format.as_str() {
        "json" => {
            let console_layer = fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_target(true);

            registry.with(console_layer).init();
        }
        _ => {
            let console_layer = fmt::layer().with_writer(io::stderr).with_target(false);

            registry.with(console_layer).init();
        }
    }

    info!("Logging initialized with level: {}", config.level);
    Ok(())
}

/// Create environment filter from log level string
fn create_env_filter(level: &str) -> Result<EnvFilter> {
    let base_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => return Err(ScanError::config(format!("Invalid log level: {level}")).into()),
    };

    // Third-party HTTP internals stay quiet unless explicitly raised.
    let filter = EnvFilter::builder()
        .with_default_directive(base_level.into())
        .from_env()
        .context("Failed to create environment filter")?
        .add_directive("hyper=info".parse()?)
        .add_directive("reqwest=info".parse()?);

    Ok(filter)
}
