//! Expansion of user target input (single IP, CIDR block or start/end pair)
//! into a bounded, ordered list of host addresses.
use crate::error::RangeError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Hard cap on the number of addresses a single target specification may produce.
pub const MAX_TARGETS: usize = 1024;

/// A parsed, validated target specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSpec {
    Single(IpAddr),
    Cidr(IpNet),
    Range { start: IpAddr, end: IpAddr },
}

impl TargetSpec {
    /// Parse a start field and an optional end field as typed by a user.
    ///
    /// - `"10.0.0.7"` with no end is a single address
    /// - `"10.0.0.0/28"` with no end is a CIDR block
    /// - `"10.0.0.1"` + `"10.0.0.9"` is an inclusive range
    ///
    /// An empty or whitespace-only end is treated as absent.
    pub fn parse(start: &str, end: Option<&str>) -> Result<Self, RangeError> {
        let start = start.trim();
        let end = end.map(str::trim).filter(|e| !e.is_empty());

        if start.contains('/') {
            if end.is_some() {
                return Err(RangeError::InvalidAddress(format!(
                    "{start}: a CIDR block cannot be combined with an end address"
                )));
            }
            let net = start
                .parse::<IpNet>()
                .map_err(|_| RangeError::InvalidAddress(start.to_string()))?;
            return Ok(TargetSpec::Cidr(net.trunc()));
        }

        let first = parse_ip(start)?;
        match end {
            None => Ok(TargetSpec::Single(first)),
            Some(e) => {
                let last = parse_ip(e)?;
                if first.is_ipv4() != last.is_ipv4() {
                    return Err(RangeError::VersionMismatch);
                }
                if first > last {
                    return Err(RangeError::ReversedRange {
                        start: first.to_string(),
                        end: last.to_string(),
                    });
                }
                if first == last {
                    Ok(TargetSpec::Single(first))
                } else {
                    Ok(TargetSpec::Range {
                        start: first,
                        end: last,
                    })
                }
            }
        }
    }

    /// Number of addresses this specification expands to.
    pub fn len(&self) -> u128 {
        match *self {
            TargetSpec::Single(_) => 1,
            TargetSpec::Cidr(IpNet::V4(n)) => {
                v4_host_bounds(n).map_or(0, |(a, b)| u128::from(b - a) + 1)
            }
            TargetSpec::Cidr(IpNet::V6(n)) => v6_host_bounds(n).map_or(0, |(a, b)| b - a + 1),
            TargetSpec::Range { start, end } => {
                (ip_to_u128(end) - ip_to_u128(start)).saturating_add(1)
            }
        }
    }

    /// True if the specification produces no address (never the case for valid input).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand into an ascending, deduplicated address list, rejecting oversized input.
    pub fn expand(&self) -> Result<Vec<IpAddr>, RangeError> {
        let count = self.len();
        if count > MAX_TARGETS as u128 {
            return Err(RangeError::RangeTooLarge {
                count,
                cap: MAX_TARGETS,
            });
        }

        let ips = match *self {
            TargetSpec::Single(ip) => vec![ip],
            TargetSpec::Cidr(IpNet::V4(n)) => match v4_host_bounds(n) {
                Some((a, b)) => (a..=b).map(|n| IpAddr::V4(Ipv4Addr::from(n))).collect(),
                None => Vec::new(),
            },
            TargetSpec::Cidr(IpNet::V6(n)) => match v6_host_bounds(n) {
                Some((a, b)) => (a..=b).map(|n| IpAddr::V6(Ipv6Addr::from(n))).collect(),
                None => Vec::new(),
            },
            TargetSpec::Range { start, end } => match (start, end) {
                (IpAddr::V4(s), IpAddr::V4(e)) => (u32::from(s)..=u32::from(e))
                    .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
                    .collect(),
                (IpAddr::V6(s), IpAddr::V6(e)) => (u128::from(s)..=u128::from(e))
                    .map(|n| IpAddr::V6(Ipv6Addr::from(n)))
                    .collect(),
                _ => return Err(RangeError::VersionMismatch),
            },
        };
        Ok(ips)
    }
}

impl std::str::FromStr for TargetSpec {
    type Err = RangeError;

    /// Single-argument form: `10.0.0.7`, `10.0.0.0/24` or `10.0.0.1-10.0.0.9`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((start, end)) => TargetSpec::parse(start, Some(end)),
            None => TargetSpec::parse(s, None),
        }
    }
}

/// Parse and expand in one step, returning the addresses as strings.
pub fn expand(start: &str, end: Option<&str>) -> Result<Vec<String>, RangeError> {
    let spec = TargetSpec::parse(start, end)?;
    Ok(spec.expand()?.into_iter().map(|ip| ip.to_string()).collect())
}

/// Expand several specifications into one ascending list with duplicates removed.
///
/// The cap applies to the merged list as well as to each specification.
pub fn expand_all(specs: &[TargetSpec]) -> Result<Vec<IpAddr>, RangeError> {
    let mut all = Vec::new();
    for spec in specs {
        all.extend(spec.expand()?);
    }
    all.sort_unstable();
    all.dedup();
    if all.len() > MAX_TARGETS {
        return Err(RangeError::RangeTooLarge {
            count: all.len() as u128,
            cap: MAX_TARGETS,
        });
    }
    Ok(all)
}

fn parse_ip(s: &str) -> Result<IpAddr, RangeError> {
    s.parse::<IpAddr>()
        .map_err(|_| RangeError::InvalidAddress(s.to_string()))
}

fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

// Inclusive numeric bounds of the usable hosts in an IPv4 block.
// /32 is the address itself, /31 is a point-to-point pair with no broadcast.
fn v4_host_bounds(net: Ipv4Net) -> Option<(u32, u32)> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    match net.prefix_len() {
        32 | 31 => Some((start, end)),
        _ if end > start + 1 => Some((start + 1, end - 1)),
        _ => None,
    }
}

// IPv6 has no broadcast; only the subnet-router anycast (network) address is skipped.
fn v6_host_bounds(net: Ipv6Net) -> Option<(u128, u128)> {
    let start = u128::from(net.network());
    let end = u128::from(net.broadcast());
    match net.prefix_len() {
        128 | 127 => Some((start, end)),
        _ => Some((start + 1, end)),
    }
}
