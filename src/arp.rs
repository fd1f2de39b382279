//! ARP-based liveness for local-subnet IPv4 targets.
//!
//! A throwaway UDP datagram makes the kernel resolve the target's MAC; the OS
//! ARP cache is then read back. No raw sockets are involved.
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

/// Discard service; any closed port works, the datagram only triggers resolution.
const TRIGGER_PORT: u16 = 9;
/// Time given to the kernel to complete the ARP exchange.
const SETTLE: Duration = Duration::from_millis(150);

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9a-f]{1,2}[:-][0-9a-f]{1,2}[:-][0-9a-f]{1,2}[:-][0-9a-f]{1,2}[:-][0-9a-f]{1,2}[:-][0-9a-f]{1,2})\b")
        .expect("valid mac regex")
});

/// Send a trigger datagram, wait briefly, then look the target up in the ARP cache.
pub async fn probe(ip: Ipv4Addr, timeout: Duration) -> Option<String> {
    if let Err(e) = send_trigger(ip).await {
        debug!(ip = %ip, "arp trigger failed: {e}");
    }
    time::sleep(SETTLE.min(timeout)).await;
    lookup_mac(ip, timeout).await
}

async fn send_trigger(ip: Ipv4Addr) -> std::io::Result<()> {
    let sock = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    sock.send_to(b"\0", SocketAddr::new(IpAddr::V4(ip), TRIGGER_PORT))
        .await?;
    Ok(())
}

/// Read the MAC for `ip` from the OS ARP cache without sending anything.
pub async fn lookup_mac(ip: Ipv4Addr, timeout: Duration) -> Option<String> {
    if cfg!(target_os = "linux") {
        if let Ok(table) = tokio::fs::read_to_string("/proc/net/arp").await {
            return parse_proc_arp(&table, ip);
        }
    }

    let args: [String; 2] = if cfg!(windows) {
        ["-a".into(), ip.to_string()]
    } else {
        ["-n".into(), ip.to_string()]
    };
    let output = Command::new("arp")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    match time::timeout(timeout.max(Duration::from_millis(500)), output).await {
        Ok(Ok(out)) => parse_arp_output(&String::from_utf8_lossy(&out.stdout), ip),
        Ok(Err(e)) => {
            debug!(ip = %ip, "arp could not be started: {e}");
            None
        }
        Err(_) => None,
    }
}

/// Parse Linux `/proc/net/arp`. Entries with flags 0x0 are incomplete.
pub fn parse_proc_arp(table: &str, ip: Ipv4Addr) -> Option<String> {
    let wanted = ip.to_string();
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || cols[0] != wanted || cols[2] == "0x0" {
            return None;
        }
        normalize_mac(cols[3])
    })
}

/// Parse `arp -a <ip>` (Windows) or `arp -n <ip>` (BSD/macOS) output.
pub fn parse_arp_output(output: &str, ip: Ipv4Addr) -> Option<String> {
    let wanted = ip.to_string();
    let bracketed = format!("({wanted})");
    output
        .lines()
        .filter(|line| {
            line.split_whitespace()
                .any(|tok| tok == wanted || tok == bracketed)
        })
        .find_map(|line| {
            MAC_RE
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| normalize_mac(m.as_str()))
        })
}

/// Lowercase, colon-separated, zero-padded form. Zero and broadcast MACs are rejected.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<u8> = raw
        .split([':', '-'])
        .map(|p| u8::from_str_radix(p, 16))
        .collect::<Result<_, _>>()
        .ok()?;
    if octets.len() != 6 || octets.iter().all(|&b| b == 0) || octets.iter().all(|&b| b == 0xff) {
        return None;
    }
    Some(
        octets
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
