//! Configuration management
//!
//! Provides centralized configuration with support for:
//! - TOML configuration files
//! - Environment variable overrides (RECON_ prefix)
//! - Command-line overrides applied per scan

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port discovery settings
    pub scanning: ScanningConfig,
    /// Connect and resolution timeouts
    pub network: NetworkConfig,
    /// Analyzer dispatch settings
    pub dispatch: DispatchConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Output configuration
    pub output: OutputConfig,
    /// Concurrency tuning
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanningConfig {
    /// Hard cap on the number of ports a single job may probe
    pub max_ports: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-port connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Prefer an IPv4 address when a hostname resolves to several
    pub prefer_ipv4: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-analyzer call timeout in seconds
    pub analyzer_timeout_secs: u64,
    /// Analyzer endpoints; empty means use the builtin registry
    pub analyzers: Vec<AnalyzerConfig>,
}

/// One configured analyzer endpoint.
///
/// `ports: None` marks an any-port analyzer that runs on every job;
/// otherwise the analyzer is dispatched only when one of its ports is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub name: String,
    pub endpoint: String,
    pub ports: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Console format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default report format (human, json)
    pub default_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum probes in flight at once; clamped again by the prober's
    /// hard ceiling regardless of what is configured here
    pub max_concurrent_probes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scanning: ScanningConfig { max_ports: 1500 },
            network: NetworkConfig {
                connect_timeout_ms: 1000,
                prefer_ipv4: true,
            },
            dispatch: DispatchConfig {
                analyzer_timeout_secs: 60,
                analyzers: Vec::new(),
            },
            logging: LoggingConfig::default(),
            output: OutputConfig {
                default_format: "human".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_probes: 200,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub async fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let mut settings = config::Config::builder();

        // Start with default configuration
        settings = settings.add_source(config::Config::try_from(&Self::default())?);

        if config_path.exists() {
            debug!("Found configuration file, loading settings");
            settings = settings.add_source(config::File::from(config_path));
        } else {
            info!("No configuration file found, using defaults");
            Self::create_default_config(config_path).await?;
        }

        // Override with environment variables (prefixed with RECON_)
        settings = settings.add_source(
            config::Environment::with_prefix("RECON")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = settings
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        info!("Configuration loaded from {}", config_path.display());
        Ok(config)
    }

    /// Create a default configuration file
    async fn create_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        let default_config = Self::default();
        let config_content = toml::to_string_pretty(&default_config)
            .context("Failed to serialize default configuration")?;

        tokio::fs::write(path, config_content)
            .await
            .context("Failed to write default configuration file")?;

        info!("Created default configuration file: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid logging level: {}", self.logging.level),
        }

        match self.output.default_format.to_lowercase().as_str() {
            "human" | "json" => {}
            _ => anyhow::bail!("Invalid output format: {}", self.output.default_format),
        }

        if self.scanning.max_ports == 0 {
            anyhow::bail!("max_ports must be greater than 0");
        }

        if self.performance.max_concurrent_probes == 0 {
            anyhow::bail!("max_concurrent_probes must be greater than 0");
        }

        if self.network.connect_timeout_ms == 0 {
            anyhow::bail!("connect_timeout_ms must be greater than 0");
        }

        for analyzer in &self.dispatch.analyzers {
            if analyzer.name.is_empty() {
                anyhow::bail!("Analyzer with empty name in dispatch config");
            }
            if analyzer.endpoint.is_empty() {
                anyhow::bail!("Analyzer {} has an empty endpoint", analyzer.name);
            }
            if let Some(ports) = &analyzer.ports {
                if ports.is_empty() {
                    anyhow::bail!(
                        "Analyzer {} has an empty port list; omit `ports` for any-port",
                        analyzer.name
                    );
                }
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Per-port connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    /// Per-analyzer dispatch timeout as a Duration
    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.analyzer_timeout_secs)
    }
}
