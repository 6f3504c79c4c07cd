//! Recon Scanner - Automated Network Reconnaissance
//!
//! Main entry point: initializes logging, loads configuration, builds the
//! analyzer registry, and runs one scan job to completion. Ctrl-C cancels
//! the job in flight.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use recon_scanner::{
    cli::Cli,
    config::AppConfig,
    dispatch::HttpAnalyzerClient,
    logging,
    orchestrator::{Orchestrator, ScanOptions},
    registry::AnalyzerRegistry,
    reporting::{self, ReportFormat},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(message) = cli.validate() {
        anyhow::bail!(message);
    }

    let mut logging_config = recon_scanner::config::LoggingConfig::default();
    logging_config.level = cli.log_level().to_string();
    logging::init_logging_with_config(&logging_config)?;

    let config = AppConfig::load(&cli.config_path).await?;
    if cli.validate_config {
        println!("Configuration OK: {}", cli.config_path.display());
        return Ok(());
    }

    let registry = if cli.probe_only {
        AnalyzerRegistry::empty()
    } else if config.dispatch.analyzers.is_empty() {
        AnalyzerRegistry::builtin()
    } else {
        AnalyzerRegistry::from_config(&config.dispatch.analyzers)?
    };
    info!("Analyzer registry loaded with {} analyzers", registry.len());

    let format = match cli.format {
        Some(format) => ReportFormat::from_str(&format.to_string())?,
        None => ReportFormat::from_str(&config.output.default_format)?,
    };

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(registry),
        Arc::new(HttpAnalyzerClient::new()),
    );

    // Ctrl-C cancels the job; the orchestrator abandons in-flight work.
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling scan");
            cancel.cancel();
        }
    });

    let options = ScanOptions {
        ports: cli.ports.clone(),
        connect_timeout: cli.connect_timeout.map(Duration::from_millis),
        concurrency: cli.concurrency,
        analyzer_timeout: cli.analyzer_timeout.map(Duration::from_secs),
    };

    match orchestrator.run_scan(&cli.target, options).await {
        Ok(report) => {
            reporting::write_report(&report, format, cli.output.as_deref()).await?;
            Ok(())
        }
        Err(e) => {
            anyhow::bail!("scan failed ({}): {}", e.kind(), e)
        }
    }
}
