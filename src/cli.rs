//! Command-line interface definition
//!
//! Argument parsing for scan jobs: target and port selection, timeouts,
//! concurrency, analyzer control, and output options. Validation mirrors
//! the resolver's rules so obviously bad input fails before a job starts.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "recon_scanner",
    about = "Automated network reconnaissance orchestrator",
    long_about = "Discovers responsive TCP ports on a target under a bounded \
                  concurrency ceiling, dispatches applicable protocol analyzers \
                  against the open ports, and merges everything into one report"
)]
pub struct Cli {
    /// Target to scan (IP literal or hostname)
    #[arg(required = true)]
    pub target: String,

    /// Port specification (e.g. 22,80,443 or 1-1024 or mixtures)
    #[arg(short = 'p', long)]
    pub ports: Option<String>,

    /// Per-port connect timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub connect_timeout: Option<u64>,

    /// Maximum concurrent probes (server-clamped)
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Per-analyzer call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub analyzer_timeout: Option<u64>,

    /// Skip analyzer dispatch; probe ports only
    #[arg(long)]
    pub probe_only: bool,

    /// Output file path (stdout when omitted)
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", default_value = "config.toml")]
    pub config_path: PathBuf,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,

    /// Increase verbosity level
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl Cli {
    /// Validate CLI arguments and resolve conflicts
    pub fn validate(&self) -> Result<(), String> {
        if self.quiet && self.verbose > 0 {
            return Err("Cannot use both quiet and verbose modes".to_string());
        }

        if let Some(ports) = &self.ports {
            validate_port_spec(ports)?;
        }

        if self.connect_timeout == Some(0) {
            return Err("connect-timeout must be greater than 0".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("concurrency must be at least 1".to_string());
        }

        if self.analyzer_timeout == Some(0) {
            return Err("analyzer-timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Effective log level from the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}

/// Surface-level port spec validation; the resolver applies the full
/// grammar later
fn validate_port_spec(ports: &str) -> Result<(), String> {
    if ports.trim().is_empty() {
        return Err("Port specification is empty".to_string());
    }
    if !ports
        .chars()
        .all(|c| c.is_ascii_digit() || c == ',' || c == '-' || c.is_ascii_whitespace())
    {
        return Err(format!("Invalid characters in port specification: {ports}"));
    }
    Ok(())
}
