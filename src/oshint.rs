//! Coarse OS family guess from the ICMP TTL and the set of open ports.
use std::collections::BTreeSet;

pub const WINDOWS: &str = "Windows";
pub const LINUX_UNIX: &str = "Linux/Unix";
pub const MACOS: &str = "macOS";
pub const NETWORK_DEVICE: &str = "Network Device";
pub const UNKNOWN: &str = "Unknown";

const WINDOWS_PORTS: [u16; 4] = [135, 139, 445, 3389];
const MACOS_PORTS: [u16; 1] = [548];

/// Family implied by an initial TTL. Hosts start at 64, 128 or 255 and every
/// router hop decrements it.
pub fn from_ttl(ttl: u8) -> &'static str {
    match ttl {
        0..=64 => LINUX_UNIX,
        65..=128 => WINDOWS,
        _ => NETWORK_DEVICE,
    }
}

/// Combine the TTL and port hints into one label.
///
/// Windows beats Linux/Unix, which beats Network Device; otherwise the first
/// hint collected wins, and no hint at all is `Unknown`.
pub fn guess(ttl: Option<u8>, open_ports: &BTreeSet<u16>) -> String {
    let mut hints: Vec<&'static str> = Vec::new();
    if let Some(ttl) = ttl {
        hints.push(from_ttl(ttl));
    }
    if WINDOWS_PORTS.iter().any(|p| open_ports.contains(p)) {
        hints.push(WINDOWS);
    }
    if open_ports.contains(&22) {
        hints.push(LINUX_UNIX);
    }
    if MACOS_PORTS.iter().any(|p| open_ports.contains(p)) {
        hints.push(MACOS);
    }

    [WINDOWS, LINUX_UNIX, NETWORK_DEVICE]
        .into_iter()
        .find(|family| hints.contains(family))
        .or_else(|| hints.first().copied())
        .unwrap_or(UNKNOWN)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(list: &[u16]) -> BTreeSet<u16> {
        list.iter().copied().collect()
    }

    #[test]
    fn ttl_families() {
        assert_eq!(from_ttl(64), LINUX_UNIX);
        assert_eq!(from_ttl(57), LINUX_UNIX);
        assert_eq!(from_ttl(128), WINDOWS);
        assert_eq!(from_ttl(250), NETWORK_DEVICE);
    }

    #[test]
    fn windows_wins_ties() {
        assert_eq!(guess(Some(64), &ports(&[22, 445])), WINDOWS);
        assert_eq!(guess(Some(255), &ports(&[22])), LINUX_UNIX);
    }

    #[test]
    fn port_only_hints() {
        assert_eq!(guess(None, &ports(&[548])), MACOS);
        assert_eq!(guess(None, &ports(&[3389])), WINDOWS);
        assert_eq!(guess(Some(250), &ports(&[548])), NETWORK_DEVICE);
    }

    #[test]
    fn nothing_known() {
        assert_eq!(guess(None, &ports(&[80, 443])), UNKNOWN);
        assert_eq!(guess(None, &BTreeSet::new()), UNKNOWN);
    }
}
