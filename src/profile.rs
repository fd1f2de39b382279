//! Typed scan configuration and the built-in presets.
use crate::ports::{self, NamedRange};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A liveness detection strategy. Tried in the order given by the profile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    Icmp,
    Tcp,
    Arp,
}

/// Which ports to scan on alive hosts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortSelection {
    /// Host discovery only.
    None,
    Named(NamedRange),
    Range { start: u16, end: u16 },
    /// User-defined explicit list.
    List(Vec<u16>),
}

impl PortSelection {
    /// Candidate ports before sampling, ascending and unique.
    pub fn candidates(&self) -> Vec<u16> {
        let mut out = match self {
            PortSelection::None => Vec::new(),
            PortSelection::Named(named) => named.ports(),
            PortSelection::Range { start, end } => {
                let (lo, hi) = if start <= end { (*start, *end) } else { (*end, *start) };
                (lo.max(1)..=hi).collect()
            }
            PortSelection::List(list) => list.iter().copied().filter(|&p| p != 0).collect(),
        };
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Ports that will actually be probed, with the large-range sampling policy applied.
    pub fn ports_to_scan(&self) -> Vec<u16> {
        ports::select_ports(self.candidates())
    }
}

/// Built-in profile names.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Quick,
    Detailed,
    Custom,
}

impl ProfileKind {
    pub fn profile(self) -> ScanProfile {
        match self {
            ProfileKind::Quick => ScanProfile::quick(),
            ProfileKind::Detailed => ScanProfile::detailed(),
            ProfileKind::Custom => ScanProfile::custom(),
        }
    }
}

/// Immutable configuration for one scan run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScanProfile {
    /// Host detection budget per attempt.
    pub timeout_ms: u64,
    /// Per-port connect budget.
    pub port_timeout_ms: u64,
    /// Reverse DNS budget, kept separate from the connect budget.
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
    pub methods: Vec<DetectionStrategy>,
    pub ports: PortSelection,
    pub banner_grab: bool,
    pub parallel_workers: usize,
    #[serde(default = "default_true")]
    pub resolve_hostnames: bool,
    /// Also probe allow-listed UDP ports.
    #[serde(default)]
    pub udp: bool,
}

fn default_dns_timeout_ms() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

impl ScanProfile {
    /// Fast sweep: liveness only.
    pub fn quick() -> Self {
        Self {
            timeout_ms: 500,
            port_timeout_ms: 300,
            ports: PortSelection::None,
            banner_grab: false,
            ..Self::custom()
        }
    }

    /// Liveness plus ports 1-1024 with banner grabbing.
    pub fn detailed() -> Self {
        Self {
            timeout_ms: 2_000,
            port_timeout_ms: 1_000,
            ports: PortSelection::Named(NamedRange::Common),
            banner_grab: true,
            ..Self::custom()
        }
    }

    /// Starting point for user-assembled profiles.
    pub fn custom() -> Self {
        Self {
            timeout_ms: 1_000,
            port_timeout_ms: 500,
            dns_timeout_ms: default_dns_timeout_ms(),
            methods: vec![
                DetectionStrategy::Icmp,
                DetectionStrategy::Tcp,
                DetectionStrategy::Arp,
            ],
            ports: PortSelection::Named(NamedRange::Priority),
            banner_grab: true,
            parallel_workers: 50,
            resolve_hostnames: true,
            udp: false,
        }
    }

    /// Load a full profile from a JSON file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read profile: {}", path.as_ref().display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid profile: {}", path.as_ref().display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms.max(1))
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms.max(1))
    }

    /// Banner reads never wait longer than the connect budget or one second.
    pub fn banner_timeout(&self) -> Duration {
        self.port_timeout().min(Duration::from_secs(1))
    }
}

impl Default for ScanProfile {
    fn default() -> Self {
        Self::custom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_where_expected() {
        assert_eq!(ScanProfile::quick().ports, PortSelection::None);
        assert!(!ScanProfile::quick().banner_grab);
        assert_eq!(
            ScanProfile::detailed().ports,
            PortSelection::Named(NamedRange::Common)
        );
        assert_eq!(ScanProfile::detailed().timeout_ms, 2_000);
    }

    #[test]
    fn banner_timeout_is_bounded() {
        let mut p = ScanProfile::custom();
        p.port_timeout_ms = 5_000;
        assert_eq!(p.banner_timeout(), Duration::from_secs(1));
        p.port_timeout_ms = 200;
        assert_eq!(p.banner_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn profile_json_rejects_unknown_keys() {
        let json = r#"{
            "timeout_ms": 100, "port_timeout_ms": 50,
            "methods": ["tcp"], "ports": "none",
            "banner_grab": false, "parallel_workers": 4,
            "bogus": 1
        }"#;
        assert!(serde_json::from_str::<ScanProfile>(json).is_err());
    }

    #[test]
    fn profile_json_fills_defaults() {
        let json = r#"{
            "timeout_ms": 100, "port_timeout_ms": 50,
            "methods": ["tcp", "arp"], "ports": {"list": [80, 22, 80]},
            "banner_grab": true, "parallel_workers": 4
        }"#;
        let p: ScanProfile = serde_json::from_str(json).unwrap();
        assert_eq!(p.dns_timeout_ms, 2_000);
        assert!(p.resolve_hostnames);
        assert!(!p.udp);
        assert_eq!(p.ports.candidates(), vec![22, 80]);
    }

    #[test]
    fn reversed_port_range_is_normalized() {
        let sel = PortSelection::Range { start: 25, end: 21 };
        assert_eq!(sel.candidates(), vec![21, 22, 23, 24, 25]);
    }
}
