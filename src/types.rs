use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use ::time::{format_description::well_known, OffsetDateTime};

/// How a host was found to be alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// Loopback or one of this machine's own addresses.
    SelfHost,
    Icmp,
    Tcp(u16),
    Arp,
    None,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::SelfHost => f.write_str("Self"),
            DetectionMethod::Icmp => f.write_str("ICMP"),
            DetectionMethod::Tcp(port) => write!(f, "TCP:{port}"),
            DetectionMethod::Arp => f.write_str("ARP"),
            DetectionMethod::None => f.write_str("None"),
        }
    }
}

impl Serialize for DetectionMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome classification of a single port probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMethod {
    TcpConnect,
    TcpRefused,
    TcpTimeout,
    UdpResponse,
    UdpTimeout,
    UdpSkipped,
    /// Any other socket failure, tagged with the I/O error kind.
    Error(String),
}

impl fmt::Display for ScanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMethod::TcpConnect => f.write_str("TCP_CONNECT"),
            ScanMethod::TcpRefused => f.write_str("TCP_REFUSED"),
            ScanMethod::TcpTimeout => f.write_str("TCP_TIMEOUT"),
            ScanMethod::UdpResponse => f.write_str("UDP_RESPONSE"),
            ScanMethod::UdpTimeout => f.write_str("UDP_TIMEOUT"),
            ScanMethod::UdpSkipped => f.write_str("UDP_SKIPPED"),
            ScanMethod::Error(kind) => write!(f, "ERROR:{kind}"),
        }
    }
}

impl Serialize for ScanMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Per-port outcome. Failures are encoded in `scan_method`, never raised.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PortResult {
    pub port: u16,
    pub protocol: Protocol,
    pub is_open: bool,
    pub service_name_guess: String,
    /// Decoded, display-safe banner, at most 100 characters.
    pub banner: Option<String>,
    pub version_guess: Option<String>,
    pub response_time_ms: f64,
    pub scan_method: ScanMethod,
}

impl PortResult {
    pub fn new(port: u16, protocol: Protocol, scan_method: ScanMethod) -> Self {
        Self {
            port,
            protocol,
            is_open: false,
            service_name_guess: String::new(),
            banner: None,
            version_guess: None,
            response_time_ms: 0.0,
            scan_method,
        }
    }
}

/// Per-target accumulator, owned by exactly one scan task until it is published.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HostResult {
    pub ip: String,
    pub alive: bool,
    pub response_time_ms: f64,
    pub detection_method: DetectionMethod,
    pub hostname: String,
    /// Open TCP ports plus UDP ports that answered, ascending and unique.
    pub open_ports: BTreeSet<u16>,
    pub port_details: BTreeMap<u16, PortResult>,
    pub udp_details: BTreeMap<u16, PortResult>,
    pub os_hint: String,
    pub mac_address: Option<String>,
    pub scan_timestamp: String,
    pub error: Option<String>,
}

impl HostResult {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip: ip.to_string(),
            alive: false,
            response_time_ms: 0.0,
            detection_method: DetectionMethod::None,
            hostname: "N/A".to_string(),
            open_ports: BTreeSet::new(),
            port_details: BTreeMap::new(),
            udp_details: BTreeMap::new(),
            os_hint: "Unknown".to_string(),
            mac_address: None,
            scan_timestamp: now_rfc3339(),
            error: None,
        }
    }

    /// A host whose task failed; reported as down with the failure attached.
    pub fn failed(ip: IpAddr, error: impl Into<String>) -> Self {
        let mut result = Self::new(ip);
        result.error = Some(error.into());
        result
    }

    /// Record a port outcome, keeping `open_ports` sorted and free of duplicates.
    pub fn record_port(&mut self, result: PortResult) {
        if result.is_open {
            self.open_ports.insert(result.port);
        }
        match result.protocol {
            Protocol::Tcp => self.port_details.insert(result.port, result),
            Protocol::Udp => self.udp_details.insert(result.port, result),
        };
    }
}

/// Serializable snapshot of a whole session.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ScanSummary {
    pub total: usize,
    pub completed: usize,
    pub alive: usize,
    pub cancelled: bool,
    pub hosts: Vec<HostResult>,
}

pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
