//! Result aggregation
//!
//! Collects probe outcomes and dispatch results as they complete and merges
//! them into the final [`ScanReport`]. The builder is owned by its job and
//! consumed by `finalize`, so a report is built exactly once and never
//! mutated afterwards.

use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dispatch::DispatchResult,
    error::ProbeFailure,
    prober::ProbeOutcome,
    resolver::ScanTarget,
};

/// An open port entry in the final report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_guess: Option<String>,
}

/// A probed port that did not open, with its failure classification.
///
/// Keeping these distinguishes "checked, found nothing" from "could not
/// check" in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFailure {
    pub port: u16,
    pub error: ProbeFailure,
}

/// The single coherent report produced by a completed scan job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub job_id: Uuid,
    pub target: String,
    pub resolved_ip: IpAddr,
    pub scanned_port_count: usize,
    pub open_count: usize,
    /// Ascending by port
    pub open_ports: Vec<OpenPort>,
    /// Ascending by port
    pub probe_failures: Vec<PortFailure>,
    /// Keyed by analyzer name
    pub per_analyzer: BTreeMap<String, DispatchResult>,
    pub duration_seconds: f64,
    pub completed_at: DateTime<Utc>,
}

/// Incremental report builder owned by one scan job.
///
/// Accepts probe outcomes and dispatch results in any completion order;
/// each key (port or analyzer name) is written at most once.
pub struct ReportBuilder {
    job_id: Uuid,
    target: ScanTarget,
    scanned_port_count: usize,
    outcomes: BTreeMap<u16, ProbeOutcome>,
    per_analyzer: BTreeMap<String, DispatchResult>,
}

impl ReportBuilder {
    pub fn new(job_id: Uuid, target: ScanTarget, scanned_port_count: usize) -> Self {
        Self {
            job_id,
            target,
            scanned_port_count,
            outcomes: BTreeMap::new(),
            per_analyzer: BTreeMap::new(),
        }
    }

    /// Record one probe outcome; the port key is write-once
    pub fn record_probe(&mut self, outcome: ProbeOutcome) {
        match self.outcomes.entry(outcome.port) {
            Entry::Vacant(slot) => {
                slot.insert(outcome);
            }
            Entry::Occupied(_) => {
                warn!(port = outcome.port, "duplicate probe outcome discarded");
            }
        }
    }

    pub fn record_probes(&mut self, outcomes: impl IntoIterator<Item = ProbeOutcome>) {
        for outcome in outcomes {
            self.record_probe(outcome);
        }
    }

    /// Record one analyzer result; the name key is write-once
    pub fn record_dispatch(&mut self, result: DispatchResult) {
        match self.per_analyzer.entry(result.analyzer.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
            Entry::Occupied(_) => {
                warn!(analyzer = %result.analyzer, "duplicate dispatch result discarded");
            }
        }
    }

    /// Open ports recorded so far, used to select applicable analyzers
    pub fn open_ports(&self) -> BTreeSet<u16> {
        self.outcomes
            .values()
            .filter(|o| o.open)
            .map(|o| o.port)
            .collect()
    }

    /// Consume the builder and produce the final report.
    ///
    /// Open ports and probe failures come out in ascending port order;
    /// consuming `self` makes a second finalization impossible.
    pub fn finalize(self, duration_seconds: f64) -> ScanReport {
        let mut open_ports = Vec::new();
        let mut probe_failures = Vec::new();

        for outcome in self.outcomes.into_values() {
            if outcome.open {
                open_ports.push(OpenPort {
                    port: outcome.port,
                    service_guess: outcome.service_guess,
                });
            } else if let Some(error) = outcome.error {
                probe_failures.push(PortFailure {
                    port: outcome.port,
                    error,
                });
            }
        }

        ScanReport {
            job_id: self.job_id,
            target: self.target.host().to_string(),
            resolved_ip: self.target.addr(),
            scanned_port_count: self.scanned_port_count,
            open_count: open_ports.len(),
            open_ports,
            probe_failures,
            per_analyzer: self.per_analyzer,
            duration_seconds,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::Ipv4Addr;

    use crate::error::DispatchFailure;

    fn target() -> ScanTarget {
        ScanTarget::new(
            "192.0.2.10".to_string(),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        )
    }

    fn open_outcome(port: u16) -> ProbeOutcome {
        ProbeOutcome {
            port,
            open: true,
            error: None,
            service_guess: crate::services::service_name(port).map(str::to_string),
        }
    }

    fn failed_outcome(port: u16, error: ProbeFailure) -> ProbeOutcome {
        ProbeOutcome {
            port,
            open: false,
            error: Some(error),
            service_guess: None,
        }
    }

    #[test]
    fn test_open_ports_sorted_ascending() {
        let mut builder = ReportBuilder::new(Uuid::new_v4(), target(), 7);
        // Completion order is arbitrary; serialization order is not.
        builder.record_probe(open_outcome(80));
        builder.record_probe(failed_outcome(21, ProbeFailure::Refused));
        builder.record_probe(open_outcome(22));

        let report = builder.finalize(0.5);
        let ports: Vec<u16> = report.open_ports.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![22, 80]);
        assert_eq!(report.open_count, 2);
        assert_eq!(report.scanned_port_count, 7);
    }

    #[test]
    fn test_probe_failures_kept_with_classification() {
        let mut builder = ReportBuilder::new(Uuid::new_v4(), target(), 3);
        builder.record_probe(failed_outcome(23, ProbeFailure::Timeout));
        builder.record_probe(failed_outcome(21, ProbeFailure::Refused));
        builder.record_probe(open_outcome(22));

        let report = builder.finalize(0.1);
        assert_eq!(
            report.probe_failures,
            vec![
                PortFailure {
                    port: 21,
                    error: ProbeFailure::Refused
                },
                PortFailure {
                    port: 23,
                    error: ProbeFailure::Timeout
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_probe_key_is_discarded() {
        let mut builder = ReportBuilder::new(Uuid::new_v4(), target(), 1);
        builder.record_probe(open_outcome(80));
        builder.record_probe(failed_outcome(80, ProbeFailure::Refused));

        let report = builder.finalize(0.1);
        // First write wins; the later outcome for the same port is dropped.
        assert_eq!(report.open_ports.len(), 1);
        assert!(report.probe_failures.is_empty());
    }

    #[test]
    fn test_dispatch_results_keyed_by_name() {
        let mut builder = ReportBuilder::new(Uuid::new_v4(), target(), 0);
        builder.record_dispatch(DispatchResult::success(
            "dns".to_string(),
            json!({"records": []}),
        ));
        builder.record_dispatch(DispatchResult::failed(
            "ssh".to_string(),
            DispatchFailure::Timeout,
        ));

        let report = builder.finalize(0.1);
        assert_eq!(report.per_analyzer.len(), 2);
        assert!(report.per_analyzer["dns"].is_success());
        assert_eq!(
            report.per_analyzer["ssh"].error,
            Some(DispatchFailure::Timeout)
        );
    }

    #[test]
    fn test_open_ports_feed_analyzer_selection() {
        let mut builder = ReportBuilder::new(Uuid::new_v4(), target(), 2);
        builder.record_probe(open_outcome(22));
        builder.record_probe(failed_outcome(80, ProbeFailure::Refused));

        let open: Vec<u16> = builder.open_ports().into_iter().collect();
        assert_eq!(open, vec![22]);
    }
}
