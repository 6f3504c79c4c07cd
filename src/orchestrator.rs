//! Scan orchestration
//!
//! Drives the end-to-end job: resolve the target, probe the port set under
//! a concurrency bound, select applicable analyzers, dispatch to them
//! concurrently with per-call timeouts, and aggregate everything into one
//! report.
//!
//! Failure semantics: resolution failure short-circuits the job with no
//! partial report; per-port and per-analyzer failures are recorded inline
//! and never abort the job. Cancellation is terminal and produces no report.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    aggregator::{ReportBuilder, ScanReport},
    config::AppConfig,
    dispatch::{AnalyzerClient, DispatchRequest, DispatchResult},
    error::{DispatchFailure, Result, ScanError},
    metrics,
    prober::Prober,
    registry::{AnalyzerRegistry, Selection},
    resolver::{self, ResolveLimits},
};

/// Lifecycle of one scan job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Resolving,
    Probing,
    Dispatching,
    Aggregating,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Resolving => "resolving",
            Self::Probing => "probing",
            Self::Dispatching => "dispatching",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-scan overrides; anything unset falls back to configuration
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Raw port specification; `None` selects the builtin default list
    pub ports: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub concurrency: Option<usize>,
    pub analyzer_timeout: Option<Duration>,
}

/// Orchestrates scan jobs against a fixed registry and analyzer client.
///
/// The registry handle is read-only and shared; everything else a job
/// touches is created and owned by that job.
pub struct Orchestrator {
    config: AppConfig,
    registry: Arc<AnalyzerRegistry>,
    client: Arc<dyn AnalyzerClient>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        registry: Arc<AnalyzerRegistry>,
        client: Arc<dyn AnalyzerClient>,
    ) -> Self {
        Self {
            config,
            registry,
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for cancelling jobs run by this orchestrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one scan job to completion.
    ///
    /// Returns the single report on success; `InvalidTarget`,
    /// `InvalidPortSpec`, `TooManyPorts` and `ResolutionFailed` abort the
    /// job before any probe or dispatch activity.
    pub async fn run_scan(&self, raw_target: &str, options: ScanOptions) -> Result<ScanReport> {
        let job_id = Uuid::new_v4();
        let started = Instant::now();
        let mut state = JobState::Created;

        info!(job_id = %job_id, target = raw_target, "scan job accepted");

        // Resolving
        self.transition(job_id, &mut state, JobState::Resolving)?;
        let limits = ResolveLimits {
            max_ports: self.config.scanning.max_ports,
            prefer_ipv4: self.config.network.prefer_ipv4,
        };
        let (target, ports) =
            match resolver::resolve(raw_target, options.ports.as_deref(), limits).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.fail(job_id, &mut state, &e);
                    return Err(e);
                }
            };

        // Probing
        self.transition(job_id, &mut state, JobState::Probing)?;
        let prober = Prober::new(
            options.connect_timeout.unwrap_or(self.config.connect_timeout()),
            options
                .concurrency
                .unwrap_or(self.config.performance.max_concurrent_probes),
            self.cancel.clone(),
        );
        let outcomes = prober.probe(target.addr(), &ports).await;

        let mut builder = ReportBuilder::new(job_id, target.clone(), ports.len());
        builder.record_probes(outcomes);

        // Dispatching
        self.transition(job_id, &mut state, JobState::Dispatching)?;
        let open_ports = builder.open_ports();
        let selections = self.registry.applicable(&open_ports);
        debug!(
            job_id = %job_id,
            open = open_ports.len(),
            analyzers = selections.len(),
            "analyzer selection computed"
        );

        let analyzer_timeout = options
            .analyzer_timeout
            .unwrap_or(self.config.analyzer_timeout());
        let mut calls = self.spawn_dispatch_calls(selections, &target, analyzer_timeout);

        // Aggregating: barrier join over every dispatched call
        self.transition(job_id, &mut state, JobState::Aggregating)?;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    calls.abort_all();
                    self.transition_unchecked(job_id, &mut state, JobState::Cancelled);
                    return Err(ScanError::Cancelled);
                }
                joined = calls.join_next() => match joined {
                    Some(Ok(result)) => {
                        metrics::record_dispatch(&result);
                        builder.record_dispatch(result);
                    }
                    Some(Err(e)) => {
                        // One analyzer task dying must not take the job down.
                        error!(job_id = %job_id, "dispatch task failed to join: {}", e);
                    }
                    None => break,
                }
            }
        }

        let report = builder.finalize(started.elapsed().as_secs_f64());
        self.transition_unchecked(job_id, &mut state, JobState::Completed);
        metrics::record_scan_completed(&report);
        info!(
            job_id = %job_id,
            open = report.open_count,
            analyzers = report.per_analyzer.len(),
            duration_secs = report.duration_seconds,
            "scan job completed"
        );

        Ok(report)
    }

    /// Spawn one concurrent call per selected analyzer.
    ///
    /// The call timeout is enforced here in addition to inside the client,
    /// so a hanging collaborator only ever costs its own timeout.
    fn spawn_dispatch_calls(
        &self,
        selections: Vec<Selection>,
        target: &resolver::ScanTarget,
        analyzer_timeout: Duration,
    ) -> JoinSet<DispatchResult> {
        let mut calls = JoinSet::new();

        for selection in selections {
            let client = self.client.clone();
            let descriptor = selection.descriptor;
            let request =
                DispatchRequest::new(target.addr().to_string(), selection.matched_ports);

            calls.spawn(async move {
                let call = client.call(&descriptor, &request, analyzer_timeout);
                match timeout(analyzer_timeout, call).await {
                    Ok(Ok(payload)) => DispatchResult::success(descriptor.name, payload),
                    Ok(Err(failure)) => DispatchResult::failed(descriptor.name, failure),
                    Err(_elapsed) => {
                        DispatchResult::failed(descriptor.name, DispatchFailure::Timeout)
                    }
                }
            });
        }

        calls
    }

    /// Move to the next stage, honoring cancellation between stages
    fn transition(&self, job_id: Uuid, state: &mut JobState, next: JobState) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.transition_unchecked(job_id, state, JobState::Cancelled);
            return Err(ScanError::Cancelled);
        }
        self.transition_unchecked(job_id, state, next);
        Ok(())
    }

    fn transition_unchecked(&self, job_id: Uuid, state: &mut JobState, next: JobState) {
        debug!(
            job_id = %job_id,
            from = state.as_str(),
            to = next.as_str(),
            "job state transition"
        );
        *state = next;
    }

    fn fail(&self, job_id: Uuid, state: &mut JobState, error: &ScanError) {
        self.transition_unchecked(job_id, state, JobState::Failed);
        error!(job_id = %job_id, kind = error.kind(), "scan job failed: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use crate::registry::AnalyzerDescriptor;

    /// Scripted analyzer client: records every dispatched call and either
    /// answers, fails, or hangs per analyzer name.
    struct MockClient {
        hang: HashSet<String>,
        fail: HashMap<String, DispatchFailure>,
        calls: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn answering() -> Self {
            Self {
                hang: HashSet::new(),
                fail: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn hanging(names: &[&str]) -> Self {
            let mut mock = Self::answering();
            mock.hang = names.iter().map(|n| n.to_string()).collect();
            mock
        }

        fn dispatched(&self) -> Vec<String> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl AnalyzerClient for MockClient {
        async fn call(
            &self,
            analyzer: &AnalyzerDescriptor,
            request: &DispatchRequest,
            _call_timeout: Duration,
        ) -> std::result::Result<Value, DispatchFailure> {
            self.calls.lock().unwrap().push(analyzer.name.clone());

            if self.hang.contains(&analyzer.name) {
                tokio::time::sleep(Duration::from_secs(300)).await;
            }
            if let Some(failure) = self.fail.get(&analyzer.name) {
                return Err(failure.clone());
            }
            Ok(json!({
                "analyzer": analyzer.name,
                "target": request.target,
                "ports": request.ports,
            }))
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.network.connect_timeout_ms = 500;
        config.dispatch.analyzer_timeout_secs = 5;
        config
    }

    /// One baseline analyzer plus two port-gated ones, only one of which
    /// will match.
    fn test_registry(open_port: u16, closed_port: u16) -> AnalyzerRegistry {
        AnalyzerRegistry::from_config(&[
            crate::config::AnalyzerConfig {
                name: "baseline".to_string(),
                endpoint: "http://127.0.0.1:1/scan".to_string(),
                ports: None,
            },
            crate::config::AnalyzerConfig {
                name: "matched".to_string(),
                endpoint: "http://127.0.0.1:2/scan".to_string(),
                ports: Some(vec![open_port]),
            },
            crate::config::AnalyzerConfig {
                name: "unmatched".to_string(),
                endpoint: "http://127.0.0.1:3/scan".to_string(),
                ports: Some(vec![closed_port]),
            },
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_job_dispatches_applicable_analyzers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let client = Arc::new(MockClient::answering());
        let orchestrator = Orchestrator::new(
            test_config(),
            Arc::new(test_registry(open_port, closed_port)),
            client.clone(),
        );

        let options = ScanOptions {
            ports: Some(format!("{open_port},{closed_port}")),
            ..Default::default()
        };
        let report = orchestrator.run_scan("127.0.0.1", options).await.unwrap();

        let open: Vec<u16> = report.open_ports.iter().map(|p| p.port).collect();
        assert_eq!(open, vec![open_port]);
        assert_eq!(report.scanned_port_count, 2);

        // Baseline always runs; the matched analyzer runs; the unmatched
        // analyzer must not be called at all.
        assert_eq!(client.dispatched(), vec!["baseline", "matched"]);
        assert!(report.per_analyzer["baseline"].is_success());
        assert!(report.per_analyzer["matched"].is_success());
        assert!(!report.per_analyzer.contains_key("unmatched"));

        // The matched analyzer received exactly its matched port.
        assert_eq!(
            report.per_analyzer["matched"].payload["ports"],
            json!([open_port])
        );
        drop(listener);
    }

    #[tokio::test]
    async fn test_hanging_analyzer_is_isolated_and_marked_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();

        let client = Arc::new(MockClient::hanging(&["baseline"]));
        let orchestrator = Orchestrator::new(
            test_config(),
            Arc::new(test_registry(open_port, 1)),
            client.clone(),
        );

        let options = ScanOptions {
            ports: Some(open_port.to_string()),
            analyzer_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let started = Instant::now();
        let report = orchestrator.run_scan("127.0.0.1", options).await.unwrap();

        // The job finishes shortly after the hanging analyzer's own timeout.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            report.per_analyzer["baseline"].error,
            Some(DispatchFailure::Timeout)
        );
        assert!(report.per_analyzer["matched"].is_success());
        drop(listener);
    }

    #[tokio::test]
    async fn test_invalid_target_fails_before_any_activity() {
        let client = Arc::new(MockClient::answering());
        let orchestrator = Orchestrator::new(
            test_config(),
            Arc::new(AnalyzerRegistry::builtin()),
            client.clone(),
        );

        let err = orchestrator
            .run_scan("not a host!!", ScanOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(client.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_spec_yields_empty_report() {
        let client = Arc::new(MockClient::answering());
        let orchestrator = Orchestrator::new(
            test_config(),
            Arc::new(test_registry(80, 3389)),
            client.clone(),
        );

        let options = ScanOptions {
            ports: Some("70000".to_string()),
            ..Default::default()
        };
        let report = orchestrator.run_scan("127.0.0.1", options).await.unwrap();

        assert_eq!(report.scanned_port_count, 0);
        assert!(report.open_ports.is_empty());
        // Baseline enumeration still runs on an empty open set.
        assert_eq!(client.dispatched(), vec!["baseline"]);
    }

    #[tokio::test]
    async fn test_repeated_runs_are_deterministic() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let client = Arc::new(MockClient::answering());
        let orchestrator = Orchestrator::new(
            test_config(),
            Arc::new(test_registry(open_port, closed_port)),
            client.clone(),
        );

        let options = ScanOptions {
            ports: Some(format!("{open_port},{closed_port}")),
            ..Default::default()
        };
        let first = orchestrator
            .run_scan("127.0.0.1", options.clone())
            .await
            .unwrap();
        let second = orchestrator.run_scan("127.0.0.1", options).await.unwrap();

        assert_eq!(first.open_ports, second.open_ports);
        let classify = |report: &ScanReport| -> Vec<(String, bool)> {
            report
                .per_analyzer
                .iter()
                .map(|(name, result)| (name.clone(), result.is_success()))
                .collect()
        };
        assert_eq!(classify(&first), classify(&second));
        drop(listener);
    }

    #[tokio::test]
    async fn test_cancelled_job_returns_no_report() {
        let client = Arc::new(MockClient::answering());
        let orchestrator = Orchestrator::new(
            test_config(),
            Arc::new(AnalyzerRegistry::builtin()),
            client.clone(),
        );
        orchestrator.cancellation_token().cancel();

        let err = orchestrator
            .run_scan("127.0.0.1", ScanOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
        assert!(client.dispatched().is_empty());
    }
}
