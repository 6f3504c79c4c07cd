//! Bounded concurrent TCP prober
//!
//! Runs one connect attempt per port under a per-port timeout, with at most
//! `concurrency` probes in flight at once. Admission goes through a fair
//! FIFO semaphore; each worker owns its outcome end to end, so the only
//! shared structures are the admission gate and the in-flight gauge.
//!
//! The prober never retries and enforces no global deadline; callers that
//! want one must impose it externally.

use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{net::TcpStream, sync::Semaphore, task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::{
    error::ProbeFailure,
    metrics,
    resolver::PortSpec,
    services,
};

/// Hard ceiling on in-flight probes, independent of caller input
pub const MAX_CONCURRENCY: usize = 500;

/// Result of probing a single port; produced exactly once per port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub port: u16,
    pub open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_guess: Option<String>,
}

impl ProbeOutcome {
    fn open(port: u16) -> Self {
        Self {
            port,
            open: true,
            error: None,
            service_guess: services::service_name(port).map(str::to_string),
        }
    }

    fn failed(port: u16, failure: ProbeFailure) -> Self {
        Self {
            port,
            open: false,
            error: Some(failure),
            service_guess: None,
        }
    }
}

/// Tracks how many probes are in flight and the highest count seen.
///
/// The high-water mark is what makes the concurrency ceiling observable to
/// callers and tests.
#[derive(Debug, Default)]
struct InFlightGauge {
    current: AtomicUsize,
    high_water: AtomicUsize,
}

impl InFlightGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// Bounded concurrent prober for one scan job
pub struct Prober {
    connect_timeout: Duration,
    concurrency: usize,
    cancel: CancellationToken,
    gauge: Arc<InFlightGauge>,
}

impl Prober {
    /// Create a prober; the requested concurrency is clamped to
    /// [1, [`MAX_CONCURRENCY`]] regardless of caller input.
    pub fn new(connect_timeout: Duration, concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            connect_timeout,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
            cancel,
            gauge: Arc::new(InFlightGauge::default()),
        }
    }

    /// The effective (clamped) concurrency limit
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Highest number of probes observed in flight at once
    pub fn high_water_mark(&self) -> usize {
        self.gauge.high_water()
    }

    /// Probe every port in the spec once, returning outcomes in completion
    /// order. Ports skipped because of cancellation produce no outcome.
    pub async fn probe(&self, addr: IpAddr, ports: &PortSpec) -> Vec<ProbeOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for port in ports.iter() {
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let gauge = self.gauge.clone();
            let connect_timeout = self.connect_timeout;

            workers.spawn(async move {
                // Semaphore acquisition is FIFO; closing never happens while
                // workers hold the Arc, so an Err here is unreachable.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                if cancel.is_cancelled() {
                    return None;
                }

                gauge.enter();
                let outcome = probe_port(addr, port, connect_timeout).await;
                gauge.exit();
                Some(outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(ports.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(outcome)) => {
                    metrics::record_probe(&outcome);
                    outcomes.push(outcome);
                }
                Ok(None) => {}
                Err(e) => error!("Probe worker failed to join: {}", e),
            }
        }

        debug!(
            probed = outcomes.len(),
            open = outcomes.iter().filter(|o| o.open).count(),
            peak_in_flight = self.gauge.high_water(),
            "probe stage finished"
        );
        outcomes
    }
}

/// One connect attempt with classification; never retries
async fn probe_port(addr: IpAddr, port: u16, connect_timeout: Duration) -> ProbeOutcome {
    let sockaddr = SocketAddr::new(addr, port);

    match timeout(connect_timeout, TcpStream::connect(sockaddr)).await {
        Ok(Ok(_stream)) => {
            trace!(port = port, "port open");
            ProbeOutcome::open(port)
        }
        Ok(Err(e)) => ProbeOutcome::failed(port, ProbeFailure::classify(&e)),
        Err(_elapsed) => ProbeOutcome::failed(port, ProbeFailure::Timeout),
    }
}
