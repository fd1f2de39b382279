use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 CIDR network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed.
pub fn detect_local_cidrs() -> Result<Vec<IpNet>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(ip));
        }
    }
    let mut cidrs: Vec<IpNet> = set.into_iter().map(IpNet::V4).collect();
    // Sort for stable output
    cidrs.sort_by_key(|n| match n {
        IpNet::V4(n4) => (u32::from(n4.network()), n4.prefix_len()),
        IpNet::V6(_) => (0, 0),
    });
    Ok(cidrs)
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}

/// Snapshot of this machine's addresses, taken once per scan session.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    addresses: Vec<IpAddr>,
    subnets: Vec<IpNet>,
}

impl LocalNetwork {
    /// Read interface addresses. Failure leaves an empty snapshot; detection still
    /// works through the RFC1918/loopback rules.
    pub fn detect() -> Self {
        let addresses = match get_if_addrs() {
            Ok(ifaces) => ifaces.into_iter().map(|i| i.ip()).collect(),
            Err(e) => {
                warn!("failed to enumerate interfaces: {e}");
                Vec::new()
            }
        };
        let subnets = detect_local_cidrs().unwrap_or_default();
        Self { addresses, subnets }
    }

    pub fn from_parts(addresses: Vec<IpAddr>, subnets: Vec<IpNet>) -> Self {
        Self { addresses, subnets }
    }

    /// Loopback or one of our own interface addresses.
    pub fn is_self(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.addresses.contains(&ip)
    }

    /// Private, loopback, link-local or inside one of our own /24 networks.
    pub fn is_local_subnet(&self, ip: IpAddr) -> bool {
        let private = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_loopback() || is_unique_local(v6) || is_unicast_link_local(v6),
        };
        private || self.subnets.iter().any(|net| net.contains(&ip))
    }
}

fn is_unique_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_unicast_link_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}
