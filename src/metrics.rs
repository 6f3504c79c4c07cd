//! Scan metrics
//!
//! Counters for probe and dispatch activity through the `metrics` facade.
//! Without an installed recorder these are no-ops, so instrumentation costs
//! nothing in the default CLI path while staying available to embedders.

use metrics::{counter, histogram};

use crate::{aggregator::ScanReport, dispatch::DispatchResult, prober::ProbeOutcome};

/// Record one completed probe
pub fn record_probe(outcome: &ProbeOutcome) {
    if outcome.open {
        counter!("recon_ports_open_total", 1);
    } else if let Some(error) = &outcome.error {
        counter!("recon_probe_failures_total", 1, "kind" => error.label());
    }
    counter!("recon_ports_probed_total", 1);
}

/// Record one completed analyzer dispatch
pub fn record_dispatch(result: &DispatchResult) {
    match &result.error {
        None => counter!("recon_dispatches_total", 1, "outcome" => "success"),
        Some(error) => {
            counter!("recon_dispatches_total", 1, "outcome" => "error");
            counter!("recon_dispatch_failures_total", 1, "kind" => error.label());
        }
    }
}

/// Record a finished scan job
pub fn record_scan_completed(report: &ScanReport) {
    counter!("recon_scans_completed_total", 1);
    histogram!("recon_scan_duration_seconds", report.duration_seconds);
    histogram!(
        "recon_scan_ports_scanned",
        report.scanned_port_count as f64
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // No recorder is installed in tests; these verify the call paths do not
    // panic for every outcome shape.
    #[test]
    fn test_record_paths_are_safe_without_recorder() {
        record_probe(&ProbeOutcome {
            port: 22,
            open: true,
            error: None,
            service_guess: Some("ssh".to_string()),
        });
        record_probe(&ProbeOutcome {
            port: 23,
            open: false,
            error: Some(crate::error::ProbeFailure::Timeout),
            service_guess: None,
        });
        record_dispatch(&DispatchResult::success("dns".to_string(), json!({})));
        record_dispatch(&DispatchResult::failed(
            "ssh".to_string(),
            crate::error::DispatchFailure::Timeout,
        ));
    }
}
