//! Report rendering and output
//!
//! Serializes a finished [`ScanReport`] as pretty JSON or a human-readable
//! summary. Ordering is deterministic: open ports ascending, analyzers in
//! name order. Analyzers that could not be checked stay in the output with
//! their error marker instead of being dropped.

use std::path::Path;

use tokio::fs;
use tracing::info;

use crate::{
    aggregator::ScanReport,
    error::{Result, ScanError},
};

/// Supported report formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(ScanError::output(other, "unsupported report format")),
        }
    }
}

/// Render a report in the requested format
pub fn render(report: &ScanReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => render_json(report),
        ReportFormat::Human => Ok(render_human(report)),
    }
}

/// Render the report to a file, or stdout when no path is given
pub async fn write_report(
    report: &ScanReport,
    format: ReportFormat,
    output_path: Option<&Path>,
) -> Result<()> {
    let content = render(report, format)?;

    match output_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            fs::write(path, content).await?;
            info!("Report written: {}", path.display());
        }
        None => println!("{content}"),
    }

    Ok(())
}

fn render_json(report: &ScanReport) -> Result<String> {
    serde_json::to_string_pretty(report)
        .map_err(|e| ScanError::output("json", format!("serialization failed: {e}")))
}

fn render_human(report: &ScanReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("Scan report for {}\n", report.target));
    out.push_str(&format!("  Job:          {}\n", report.job_id));
    out.push_str(&format!("  Resolved IP:  {}\n", report.resolved_ip));
    out.push_str(&format!("  Ports probed: {}\n", report.scanned_port_count));
    out.push_str(&format!("  Duration:     {:.3}s\n", report.duration_seconds));

    out.push_str(&format!("\nOpen ports ({}):\n", report.open_count));
    if report.open_ports.is_empty() {
        out.push_str("  (none)\n");
    }
    for entry in &report.open_ports {
        out.push_str(&format!(
            "  {:>5}/tcp  {}\n",
            entry.port,
            entry.service_guess.as_deref().unwrap_or("unknown")
        ));
    }

    if !report.probe_failures.is_empty() {
        out.push_str(&format!(
            "\nUnresponsive ports ({}):\n",
            report.probe_failures.len()
        ));
        for failure in &report.probe_failures {
            out.push_str(&format!("  {:>5}/tcp  {}\n", failure.port, failure.error));
        }
    }

    out.push_str(&format!("\nAnalyzers ({}):\n", report.per_analyzer.len()));
    if report.per_analyzer.is_empty() {
        out.push_str("  (none dispatched)\n");
    }
    for (name, result) in &report.per_analyzer {
        match &result.error {
            None => out.push_str(&format!("  {name:<12} ok\n")),
            Some(error) => out.push_str(&format!("  {name:<12} error: {error}\n")),
        }
    }

    out
}
