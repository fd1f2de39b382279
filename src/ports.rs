use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Above this many candidates the port list is sampled instead of scanned exhaustively.
pub const SAMPLE_THRESHOLD: usize = 1000;
/// Number of non-priority ports kept when sampling.
pub const SAMPLE_SIZE: usize = 200;

/// High-value ports that are always scanned, whatever the sampling policy.
pub const PRIORITY_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 161, 389, 443, 445, 465, 548, 587, 993, 995,
    1433, 1521, 1723, 2049, 3306, 3389, 5432, 5900, 5985, 6379, 8000, 8080, 8443, 8888, 9200,
    11211, 27017,
];

/// Named port sets offered to users.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NamedRange {
    Web,
    Email,
    File,
    Database,
    Priority,
    /// 1-1024
    Common,
    /// 1-10000
    Extended,
    /// 1-65535
    Full,
}

impl NamedRange {
    pub fn ports(self) -> Vec<u16> {
        match self {
            NamedRange::Web => vec![80, 443, 8000, 8008, 8080, 8443, 8888],
            NamedRange::Email => vec![25, 110, 143, 465, 587, 993, 995],
            NamedRange::File => vec![20, 21, 22, 139, 445, 2049, 3389],
            NamedRange::Database => vec![1433, 1521, 3306, 5432, 6379, 11211, 27017],
            NamedRange::Priority => PRIORITY_PORTS.to_vec(),
            NamedRange::Common => (1..=1024).collect(),
            NamedRange::Extended => (1..=10_000).collect(),
            NamedRange::Full => (1..=u16::MAX).collect(),
        }
    }
}

/// Parse a ports list into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - several entries separated by commas: `22,80,8000-8002`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        for entry in line.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some((a, b)) = entry.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port_str(entry)
                .with_context(|| format!("line {line_no}: invalid port value: {entry}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Apply the sampling policy to an ascending candidate list.
///
/// Up to [`SAMPLE_THRESHOLD`] candidates are returned unchanged. Larger lists keep
/// every candidate that is a priority port plus a random sample of
/// [`SAMPLE_SIZE`] of the rest. The result is ascending and unique.
pub fn select_ports(mut candidates: Vec<u16>) -> Vec<u16> {
    candidates.sort_unstable();
    candidates.dedup();
    if candidates.len() <= SAMPLE_THRESHOLD {
        return candidates;
    }

    let (mut selected, mut rest): (Vec<u16>, Vec<u16>) = candidates
        .into_iter()
        .partition(|p| PRIORITY_PORTS.contains(p));
    rest.shuffle(&mut rand::rng());
    rest.truncate(SAMPLE_SIZE);
    selected.extend(rest);
    selected.sort_unstable();
    selected
}

/// Well-known service name for a port, used when no banner signature matched.
pub fn well_known_service(port: u16) -> Option<&'static str> {
    let name = match port {
        20 => "FTP-Data",
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        67 | 68 => "DHCP",
        69 => "TFTP",
        80 => "HTTP",
        110 => "POP3",
        111 => "RPCBind",
        123 => "NTP",
        135 => "MSRPC",
        137..=139 => "NetBIOS",
        143 => "IMAP",
        161 => "SNMP",
        389 => "LDAP",
        443 => "HTTPS",
        445 => "SMB",
        465 => "SMTPS",
        500 => "IKE",
        514 => "Syslog",
        548 => "AFP",
        587 => "SMTP",
        631 => "IPP",
        993 => "IMAPS",
        995 => "POP3S",
        1433 => "MSSQL",
        1521 => "Oracle",
        1723 => "PPTP",
        1883 => "MQTT",
        1900 => "SSDP",
        2049 => "NFS",
        3306 => "MySQL",
        3389 => "RDP",
        5353 => "mDNS",
        5432 => "PostgreSQL",
        5900 => "VNC",
        5985 | 5986 => "WinRM",
        6379 => "Redis",
        8000 | 8008 | 8080 | 8888 => "HTTP-Alt",
        8443 => "HTTPS-Alt",
        9200 => "Elasticsearch",
        11211 => "Memcached",
        27017 => "MongoDB",
        _ => return None,
    };
    Some(name)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports() {
        let input = "80\n22\n   443  \n";
        let ports = parse_ports_str(input).unwrap();
        assert_eq!(ports, vec![80, 22, 443]);
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let input = "8000-8002\n80\n8001\n";
        let ports = parse_ports_str(input).unwrap();
        assert_eq!(ports, vec![8000, 8001, 8002, 80]);
    }

    #[test]
    fn parse_comma_separated() {
        let ports = parse_ports_str("22, 80,8000-8001 # dev").unwrap();
        assert_eq!(ports, vec![22, 80, 8000, 8001]);
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_ports_str("70000\n").is_err());
        assert!(parse_ports_str("90-80\n").is_err());
    }

    #[test]
    fn small_lists_are_not_sampled() {
        let ports = select_ports(vec![443, 22, 80, 22]);
        assert_eq!(ports, vec![22, 80, 443]);
    }

    #[test]
    fn large_lists_keep_priority_ports_and_sample_the_rest() {
        let ports = select_ports(NamedRange::Full.ports());
        assert_eq!(ports.len(), PRIORITY_PORTS.len() + SAMPLE_SIZE);
        for p in PRIORITY_PORTS {
            assert!(ports.contains(p), "priority port {p} missing");
        }
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sampling_only_keeps_priority_ports_that_were_candidates() {
        let ports = select_ports((2000..=4000).collect());
        // 2049, 3306 and 3389 are the only priority ports in range
        assert_eq!(ports.len(), 3 + SAMPLE_SIZE);
        assert!([2049, 3306, 3389].iter().all(|p| ports.contains(p)));
    }

    #[test]
    fn well_known_lookup() {
        assert_eq!(well_known_service(22), Some("SSH"));
        assert_eq!(well_known_service(138), Some("NetBIOS"));
        assert_eq!(well_known_service(40000), None);
    }
}
