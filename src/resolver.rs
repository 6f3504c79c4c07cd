//! Target and port specification resolution
//!
//! Validates and normalizes the caller's raw target and port selection
//! before any network activity:
//! - Target: IPv4/IPv6 literal or hostname; hostnames go through the system
//!   resolver exactly once and the resolved address is fixed for the job.
//! - Ports: single integers, comma lists, inclusive `a-b` ranges and
//!   mixtures collapse into a duplicate-free set; out-of-range values are
//!   dropped silently; cardinality is capped before anything is probed.

use std::{collections::BTreeSet, net::IpAddr, str::FromStr};

use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;
use tracing::debug;

use crate::error::{Result, ScanError};

/// Ports probed when the caller supplies no specification
pub const DEFAULT_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 143, 443, 445, 465, 587, 993, 995, 1433, 1434, 1521, 1723,
    2049, 3306, 3389, 5432, 5900, 8080, 8443,
];

/// A validated scan target with its resolved address.
///
/// The resolved IP is fixed for the lifetime of the job; later stages never
/// re-resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    host: String,
    addr: IpAddr,
}

impl ScanTarget {
    pub fn new(host: String, addr: IpAddr) -> Self {
        Self { host, addr }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }
}

impl std::fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host == self.addr.to_string() {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{} ({})", self.host, self.addr)
        }
    }
}

/// A bounded, duplicate-free set of ports in [1,65535]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec(BTreeSet<u16>);

impl PortSpec {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    /// Ports in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u16> for PortSpec {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Limits enforced during resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveLimits {
    pub max_ports: usize,
    pub prefer_ipv4: bool,
}

impl Default for ResolveLimits {
    fn default() -> Self {
        Self {
            max_ports: 1500,
            prefer_ipv4: true,
        }
    }
}

/// Resolve a raw target and port specification into job inputs.
///
/// Fails with `InvalidTarget`, `InvalidPortSpec` or `TooManyPorts` before
/// touching the network, and with `ResolutionFailed` when the hostname does
/// not resolve.
pub async fn resolve(
    raw_target: &str,
    raw_ports: Option<&str>,
    limits: ResolveLimits,
) -> Result<(ScanTarget, PortSpec)> {
    let host = validate_target_syntax(raw_target)?;

    // Port parsing happens before resolution so an oversized request never
    // triggers a DNS query.
    let ports = match raw_ports {
        Some(spec) if !spec.trim().is_empty() => parse_port_spec(spec, limits.max_ports)?,
        _ => DEFAULT_PORTS.iter().copied().collect(),
    };

    let addr = resolve_host(&host, limits.prefer_ipv4).await?;
    debug!(host = %host, addr = %addr, ports = ports.len(), "target resolved");

    Ok((ScanTarget::new(host, addr), ports))
}

/// Syntactic target validation: IP literals pass through, everything else
/// must look like a hostname
fn validate_target_syntax(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScanError::invalid_target(raw, "empty target"));
    }

    if IpAddr::from_str(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    // Hostname: letters, digits, dots and hyphens; labels non-empty
    let legal = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !legal || trimmed.split('.').any(str::is_empty) {
        return Err(ScanError::invalid_target(
            trimmed,
            "not an IP literal or a legal hostname",
        ));
    }

    Ok(trimmed.to_string())
}

/// Parse a port specification string into a capped set.
///
/// Accepts `"80"`, `"80,443"`, `"1-1024"` and mixtures. Range bounds are
/// auto-swapped when reversed and clamped to [1,65535]; single values
/// outside that range are dropped rather than rejected, so `"70000"` parses
/// to an empty set.
pub fn parse_port_spec(spec: &str, max_ports: usize) -> Result<PortSpec> {
    if !spec
        .chars()
        .all(|c| c.is_ascii_digit() || c == ',' || c == '-' || c.is_ascii_whitespace())
    {
        return Err(ScanError::invalid_port_spec(
            spec,
            "only digits, commas, ranges and whitespace are allowed",
        ));
    }

    let mut ports = BTreeSet::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((a, b)) = part.split_once('-') {
            let (Ok(a), Ok(b)) = (a.trim().parse::<u32>(), b.trim().parse::<u32>()) else {
                continue;
            };
            let (lo, hi) = if a > b { (b, a) } else { (a, b) };
            for port in lo.max(1)..=hi.min(65535) {
                ports.insert(port as u16);
            }
        } else if let Ok(port) = part.parse::<u32>() {
            if (1..=65535).contains(&port) {
                ports.insert(port as u16);
            }
        }
    }

    if ports.len() > max_ports {
        return Err(ScanError::TooManyPorts {
            requested: ports.len(),
            limit: max_ports,
        });
    }

    Ok(PortSpec(ports))
}

/// Resolve a host string to a single address.
///
/// IP literals short-circuit; hostnames go through the system resolver,
/// preferring IPv4 when configured to.
async fn resolve_host(host: &str, prefer_ipv4: bool) -> Result<IpAddr> {
    if let Ok(addr) = IpAddr::from_str(host) {
        return Ok(addr);
    }

    // lookup_host needs a port; it is discarded from the results
    let addrs: Vec<IpAddr> = lookup_host((host, 0u16))
        .await
        .map_err(|e| ScanError::resolution_failed(host, e.to_string()))?
        .map(|sockaddr| sockaddr.ip())
        .collect();

    let chosen = if prefer_ipv4 {
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
    } else {
        addrs.first()
    };

    chosen
        .copied()
        .ok_or_else(|| ScanError::resolution_failed(host, "no addresses returned"))
}
