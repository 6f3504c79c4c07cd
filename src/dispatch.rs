//! Analyzer dispatch
//!
//! The orchestrator talks to analyzer collaborators through the
//! [`AnalyzerClient`] seam: one synchronous request/response call per
//! applicable analyzer per job, each with a caller-imposed timeout. The
//! payload coming back is opaque structured JSON; the orchestrator embeds
//! it in the report without interpreting it.
//!
//! Every analyzer receives a single target plus the ports that matched its
//! rule. Analyzers with list-of-targets conventions are not supported.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{error::DispatchFailure, registry::AnalyzerDescriptor};

/// Request body sent to an analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Resolved target address as a string
    pub target: String,
    /// Open ports that matched the analyzer's rule; absent for any-port
    /// analyzers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
}

impl DispatchRequest {
    pub fn new(target: String, matched_ports: Vec<u16>) -> Self {
        Self {
            target,
            ports: if matched_ports.is_empty() {
                None
            } else {
                Some(matched_ports)
            },
        }
    }
}

/// Result of one analyzer call; produced exactly once per dispatched
/// analyzer, never mutated afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub analyzer: String,
    /// Analyzer-specific payload; `Value::Null` when the call failed
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DispatchFailure>,
}

impl DispatchResult {
    pub fn success(analyzer: String, payload: Value) -> Self {
        Self {
            analyzer,
            payload,
            error: None,
        }
    }

    pub fn failed(analyzer: String, failure: DispatchFailure) -> Self {
        Self {
            analyzer,
            payload: Value::Null,
            error: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Transport seam for analyzer calls.
///
/// Implementations must respect the passed timeout and map every failure to
/// a [`DispatchFailure`]; they must never panic across the boundary.
#[async_trait]
pub trait AnalyzerClient: Send + Sync {
    async fn call(
        &self,
        analyzer: &AnalyzerDescriptor,
        request: &DispatchRequest,
        call_timeout: Duration,
    ) -> std::result::Result<Value, DispatchFailure>;
}

/// HTTP JSON analyzer client
pub struct HttpAnalyzerClient {
    http: reqwest::Client,
}

impl HttpAnalyzerClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAnalyzerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyzerClient for HttpAnalyzerClient {
    async fn call(
        &self,
        analyzer: &AnalyzerDescriptor,
        request: &DispatchRequest,
        call_timeout: Duration,
    ) -> std::result::Result<Value, DispatchFailure> {
        debug!(analyzer = %analyzer.name, endpoint = %analyzer.endpoint, "dispatching analyzer call");

        let response = self
            .http
            .post(&analyzer.endpoint)
            .timeout(call_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchFailure::Timeout
                } else {
                    DispatchFailure::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchFailure::Transport(format!(
                "analyzer returned status {status}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DispatchFailure::InvalidResponse(e.to_string()))
    }
}
