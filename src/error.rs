//! Error handling for scan jobs
//!
//! Two layers of failure exist and must not be mixed up:
//! - [`ScanError`]: terminal for a job (bad input, failed resolution,
//!   cancellation, internal faults). A job that hits one of these returns
//!   no report.
//! - [`ProbeFailure`] / [`DispatchFailure`]: per-port and per-analyzer
//!   outcomes recorded inline in the report. They never abort a job.

use std::{io, net::AddrParseError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, ScanError>;

/// Terminal job errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ScanError {
    /// Target string is not an IP literal or a plausible hostname
    #[error("invalid target: {target} - {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Port specification contains characters outside the spec grammar
    #[error("invalid port spec: {spec} - {reason}")]
    InvalidPortSpec { spec: String, reason: String },

    /// Parsed port count exceeds the configured cap
    #[error("too many ports requested: {requested} (max {limit})")]
    TooManyPorts { requested: usize, limit: usize },

    /// Hostname did not resolve to any address
    #[error("resolution failed for {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    /// Job was cancelled mid-flight; no report is produced
    #[error("scan cancelled")]
    Cancelled,

    /// Configuration loading or validation errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Report serialization and output errors
    #[error("output error: {format} - {message}")]
    Output { format: String, message: String },

    /// File I/O errors
    #[error("io error: {operation} - {message}")]
    Io { operation: String, message: String },

    /// Internal faults (worker panics, poisoned state)
    #[error("internal error: {context} - {message}")]
    Internal { context: String, message: String },
}

impl ScanError {
    pub fn invalid_target<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_port_spec<S: Into<String>, R: Into<String>>(spec: S, reason: R) -> Self {
        Self::InvalidPortSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    pub fn resolution_failed<H: Into<String>, R: Into<String>>(host: H, reason: R) -> Self {
        Self::ResolutionFailed {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn output<F: Into<String>, M: Into<String>>(format: F, message: M) -> Self {
        Self::Output {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn io<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Io {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn internal<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Machine-readable error kind for API consumers
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTarget { .. } | Self::InvalidPortSpec { .. } => "invalid_input",
            Self::TooManyPorts { .. } => "too_many_ports",
            Self::ResolutionFailed { .. } => "resolution_failed",
            Self::Cancelled => "cancelled",
            Self::Configuration { .. } => "configuration",
            Self::Output { .. } => "output",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }

    /// Input errors fail fast, before any network activity
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. } | Self::InvalidPortSpec { .. } | Self::TooManyPorts { .. }
        )
    }
}

/// Classified outcome of a single failed connect attempt.
///
/// The classification is stable and is the caller's sole signal; the prober
/// never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    /// Connect attempt exceeded its per-port timeout
    #[error("timeout")]
    Timeout,
    /// Peer actively refused the connection
    #[error("refused")]
    Refused,
    /// Host or network reported unreachable
    #[error("unreachable")]
    Unreachable,
    /// Anything else, with the OS error text
    #[error("{0}")]
    Other(String),
}

impl ProbeFailure {
    /// Classify a connect-level I/O error into exactly one failure kind
    pub fn classify(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => Self::Unreachable,
            _ => Self::Other(error.to_string()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Refused => "refused",
            Self::Unreachable => "unreachable",
            Self::Other(_) => "other",
        }
    }
}

/// Classified outcome of a single failed analyzer call.
///
/// Recorded in the corresponding `DispatchResult`; the job proceeds without
/// the analyzer's payload.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchFailure {
    /// Call exceeded its per-analyzer timeout
    #[error("analyzer timed out")]
    Timeout,
    /// Connection or HTTP-level failure reaching the analyzer
    #[error("transport failure: {0}")]
    Transport(String),
    /// Analyzer responded with something that is not structured JSON
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DispatchFailure {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

// Conversions from common error types

impl From<io::Error> for ScanError {
    fn from(error: io::Error) -> Self {
        Self::io("io operation", error.to_string())
    }
}

impl From<AddrParseError> for ScanError {
    fn from(error: AddrParseError) -> Self {
        Self::invalid_target("ip address", error.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(error: serde_json::Error) -> Self {
        Self::output("json", error.to_string())
    }
}

impl From<config::ConfigError> for ScanError {
    fn from(error: config::ConfigError) -> Self {
        Self::config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let error = ScanError::invalid_target("not a host!!", "illegal characters");
        assert_eq!(error.kind(), "invalid_input");
        assert!(error.is_input_error());

        let error = ScanError::TooManyPorts {
            requested: 2000,
            limit: 1500,
        };
        assert_eq!(error.kind(), "too_many_ports");
        assert!(error.is_input_error());

        let error = ScanError::resolution_failed("nxdomain.invalid", "no address");
        assert_eq!(error.kind(), "resolution_failed");
        assert!(!error.is_input_error());
    }

    #[test]
    fn test_probe_failure_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ProbeFailure::classify(&refused), ProbeFailure::Refused);

        let unreachable = io::Error::new(io::ErrorKind::HostUnreachable, "no route");
        assert_eq!(
            ProbeFailure::classify(&unreachable),
            ProbeFailure::Unreachable
        );

        let other = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            ProbeFailure::classify(&other),
            ProbeFailure::Other(_)
        ));
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(ProbeFailure::Timeout.label(), "timeout");
        assert_eq!(
            DispatchFailure::Transport("connection reset".into()).label(),
            "transport"
        );
    }
}
