//! Analyzer registry
//!
//! A static, read-only table mapping analyzer collaborators to their
//! applicability rules. The registry is built exactly once at startup from
//! configuration (or the builtin fleet) and handed to the orchestrator
//! behind an `Arc`; it is never mutated afterwards, so concurrent reads
//! need no synchronization.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    config::AnalyzerConfig,
    error::{Result, ScanError},
};

/// Policy deciding when an analyzer is dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Applicability {
    /// Dispatched on every job, regardless of discovered ports
    AnyPort,
    /// Dispatched only when at least one of these ports is open
    SpecificPorts(BTreeSet<u16>),
}

/// One registered analyzer collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerDescriptor {
    pub name: String,
    pub endpoint: String,
    pub applicability: Applicability,
}

impl AnalyzerDescriptor {
    pub fn any_port<N: Into<String>, E: Into<String>>(name: N, endpoint: E) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            applicability: Applicability::AnyPort,
        }
    }

    pub fn specific_ports<N: Into<String>, E: Into<String>>(
        name: N,
        endpoint: E,
        ports: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            applicability: Applicability::SpecificPorts(ports.into_iter().collect()),
        }
    }
}

/// An analyzer selected for dispatch, with the open ports that matched its
/// rule (empty for any-port analyzers)
#[derive(Debug, Clone)]
pub struct Selection {
    pub descriptor: AnalyzerDescriptor,
    pub matched_ports: Vec<u16>,
}

/// Immutable analyzer table for the process lifetime
#[derive(Debug, Clone)]
pub struct AnalyzerRegistry {
    analyzers: Vec<AnalyzerDescriptor>,
}

impl AnalyzerRegistry {
    /// Build a registry from configuration entries; duplicate names are a
    /// configuration error
    pub fn from_config(entries: &[AnalyzerConfig]) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut analyzers = Vec::with_capacity(entries.len());

        for entry in entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(ScanError::config(format!(
                    "duplicate analyzer name: {}",
                    entry.name
                )));
            }
            let applicability = match &entry.ports {
                Some(ports) => Applicability::SpecificPorts(ports.iter().copied().collect()),
                None => Applicability::AnyPort,
            };
            analyzers.push(AnalyzerDescriptor {
                name: entry.name.clone(),
                endpoint: entry.endpoint.clone(),
                applicability,
            });
        }

        Ok(Self { analyzers })
    }

    /// The builtin analyzer fleet.
    ///
    /// Protocol-specific analyzers carry explicit port rules; the baseline
    /// enumeration analyzers run on every job.
    pub fn builtin() -> Self {
        let endpoint = |port: u16| format!("http://127.0.0.1:{port}/scan");
        Self {
            analyzers: vec![
                AnalyzerDescriptor::any_port("dns", endpoint(5003)),
                AnalyzerDescriptor::any_port("ping", endpoint(5007)),
                AnalyzerDescriptor::any_port("service", endpoint(5010)),
                AnalyzerDescriptor::specific_ports("ftp", endpoint(5004), [21]),
                AnalyzerDescriptor::specific_ports("ssh", endpoint(5013), [22]),
                AnalyzerDescriptor::specific_ports("telnet", endpoint(5015), [23]),
                AnalyzerDescriptor::specific_ports("smtp", endpoint(5012), [25, 465, 587]),
                AnalyzerDescriptor::specific_ports("imap", endpoint(5005), [143, 993]),
                AnalyzerDescriptor::specific_ports("smb", endpoint(5011), [139, 445]),
                AnalyzerDescriptor::specific_ports("rdp", endpoint(5009), [3389]),
                AnalyzerDescriptor::specific_ports("tls", endpoint(5016), [443, 8443]),
                AnalyzerDescriptor::specific_ports("web", endpoint(5017), [80, 443, 8080, 8443]),
            ],
        }
    }

    /// An empty registry; jobs run probe-only
    pub fn empty() -> Self {
        Self {
            analyzers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnalyzerDescriptor> {
        self.analyzers.iter()
    }

    /// Select the analyzers applicable to a set of open ports.
    ///
    /// Every any-port analyzer is always included; a specific-ports analyzer
    /// is included only when its rule intersects the open set, and then it
    /// receives the matched ports.
    pub fn applicable(&self, open_ports: &BTreeSet<u16>) -> Vec<Selection> {
        self.analyzers
            .iter()
            .filter_map(|descriptor| match &descriptor.applicability {
                Applicability::AnyPort => Some(Selection {
                    descriptor: descriptor.clone(),
                    matched_ports: Vec::new(),
                }),
                Applicability::SpecificPorts(rule) => {
                    let matched: Vec<u16> =
                        rule.intersection(open_ports).copied().collect();
                    if matched.is_empty() {
                        None
                    } else {
                        Some(Selection {
                            descriptor: descriptor.clone(),
                            matched_ports: matched,
                        })
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(ports: impl IntoIterator<Item = u16>) -> BTreeSet<u16> {
        ports.into_iter().collect()
    }

    #[test]
    fn test_any_port_always_selected() {
        let registry = AnalyzerRegistry::builtin();
        let selections = registry.applicable(&open([]));
        let names: Vec<&str> = selections
            .iter()
            .map(|s| s.descriptor.name.as_str())
            .collect();
        assert_eq!(names, vec!["dns", "ping", "service"]);
    }

    #[test]
    fn test_specific_ports_selected_on_intersection() {
        let registry = AnalyzerRegistry::builtin();
        let selections = registry.applicable(&open([22, 80]));

        let ssh = selections
            .iter()
            .find(|s| s.descriptor.name == "ssh")
            .expect("ssh selected for open port 22");
        assert_eq!(ssh.matched_ports, vec![22]);

        let web = selections
            .iter()
            .find(|s| s.descriptor.name == "web")
            .expect("web selected for open port 80");
        assert_eq!(web.matched_ports, vec![80]);

        assert!(!selections.iter().any(|s| s.descriptor.name == "rdp"));
    }

    #[test]
    fn test_matched_ports_are_only_the_intersection() {
        let registry = AnalyzerRegistry::builtin();
        let selections = registry.applicable(&open([25, 587, 8080]));

        let smtp = selections
            .iter()
            .find(|s| s.descriptor.name == "smtp")
            .unwrap();
        assert_eq!(smtp.matched_ports, vec![25, 587]);
    }

    #[test]
    fn test_from_config_rejects_duplicate_names() {
        let entries = vec![
            AnalyzerConfig {
                name: "ssh".to_string(),
                endpoint: "http://127.0.0.1:5013/scan".to_string(),
                ports: Some(vec![22]),
            },
            AnalyzerConfig {
                name: "ssh".to_string(),
                endpoint: "http://127.0.0.1:5014/scan".to_string(),
                ports: Some(vec![2222]),
            },
        ];
        let err = AnalyzerRegistry::from_config(&entries).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_from_config_maps_port_rules() {
        let entries = vec![AnalyzerConfig {
            name: "tls".to_string(),
            endpoint: "http://127.0.0.1:5016/scan".to_string(),
            ports: Some(vec![443, 8443]),
        }];
        let registry = AnalyzerRegistry::from_config(&entries).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.applicable(&open([8443]))[0].matched_ports == vec![8443]);
        assert!(registry.applicable(&open([80])).is_empty());
    }
}
