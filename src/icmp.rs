//! ICMP echo through the system `ping` utility.
//!
//! Raw ICMP sockets need elevated privileges on common desktop systems, so the
//! echo is delegated to the platform's ping binary and its output is parsed.
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time;
use tracing::debug;

/// Echo requests sent per probe.
pub const ECHO_COUNT: u32 = 2;

static TTL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ttl[=:]\s*(\d+)").expect("valid ttl regex"));
static RTT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)time\s*[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid rtt regex"));

/// A successful echo as reported by the ping utility.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoReply {
    pub ttl: Option<u8>,
    pub rtt_ms: f64,
}

/// Which command-line dialect the ping binary speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingFlavor {
    Windows,
    /// Linux iputils / busybox: `-W` in seconds, `-6` for IPv6.
    Posix,
    /// macOS and the BSDs: `-W` in milliseconds, IPv6 through `ping6`.
    Bsd,
}

impl PingFlavor {
    pub fn current() -> Self {
        if cfg!(windows) {
            PingFlavor::Windows
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            PingFlavor::Bsd
        } else {
            PingFlavor::Posix
        }
    }

    /// Binary to run for `ip`.
    pub fn program(self, ip: IpAddr) -> &'static str {
        match self {
            PingFlavor::Bsd if ip.is_ipv6() => "ping6",
            _ => "ping",
        }
    }
}

/// Arguments for the ping binary: count, per-packet timeout, address family and target.
pub fn ping_args(flavor: PingFlavor, ip: IpAddr, timeout: Duration) -> Vec<String> {
    let count = ECHO_COUNT.to_string();
    let family = if ip.is_ipv6() { "-6" } else { "-4" };
    match flavor {
        PingFlavor::Windows => vec![
            "-n".into(),
            count,
            "-w".into(),
            timeout.as_millis().max(1).to_string(),
            family.into(),
            ip.to_string(),
        ],
        PingFlavor::Posix => {
            // POSIX -W takes whole seconds
            let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
            let mut args = vec!["-c".into(), count, "-W".into(), secs.to_string()];
            if ip.is_ipv6() {
                args.push(family.into());
            }
            args.push(ip.to_string());
            args
        }
        PingFlavor::Bsd => {
            let mut args = vec!["-c".into(), count];
            // ping6 has no per-reply wait flag; the whole-run budget bounds it.
            if ip.is_ipv4() {
                args.push("-W".into());
                args.push(timeout.as_millis().max(1).to_string());
            }
            args.push(ip.to_string());
            args
        }
    }
}

/// Parse ping output. A reply needs a TTL marker and no "unreachable" text.
pub fn parse_ping_output(stdout: &str) -> Option<EchoReply> {
    let lower = stdout.to_ascii_lowercase();
    if !lower.contains("ttl=") || lower.contains("unreachable") {
        return None;
    }
    let ttl = TTL_RE
        .captures(stdout)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok());
    let rtt_ms = RTT_RE
        .captures(stdout)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(EchoReply { ttl, rtt_ms })
}

/// Ping `ip`. Spawn failure, non-zero exit, unparseable output or overrun all yield `None`.
pub async fn ping(ip: IpAddr, timeout: Duration) -> Option<EchoReply> {
    let flavor = PingFlavor::current();
    let args = ping_args(flavor, ip, timeout);
    // Whole-run budget: every echo may use its timeout, plus process overhead.
    let budget = timeout * ECHO_COUNT + Duration::from_secs(1);

    let start = Instant::now();
    let child = Command::new(flavor.program(ip))
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match time::timeout(budget, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(ip = %ip, "ping could not be started: {e}");
            return None;
        }
        Err(_) => {
            debug!(ip = %ip, "ping overran its budget");
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut reply = parse_ping_output(&stdout)?;
    if reply.rtt_ms <= 0.0 {
        reply.rtt_ms = start.elapsed().as_secs_f64() * 1000.0;
    }
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OK: &str = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.\n\
        64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.412 ms\n\
        64 bytes from 10.0.0.1: icmp_seq=2 ttl=64 time=0.388 ms\n\n\
        --- 10.0.0.1 ping statistics ---\n\
        2 packets transmitted, 2 received, 0% packet loss, time 1001ms\n";

    const WINDOWS_OK: &str = "Pinging 10.0.0.1 with 32 bytes of data:\r\n\
        Reply from 10.0.0.1: bytes=32 time<1ms TTL=128\r\n\
        Reply from 10.0.0.1: bytes=32 time<1ms TTL=128\r\n";

    const WINDOWS_UNREACHABLE: &str = "Pinging 10.0.0.9 with 32 bytes of data:\r\n\
        Reply from 10.0.0.2: Destination host unreachable.\r\n";

    #[test]
    fn parses_linux_reply() {
        let reply = parse_ping_output(LINUX_OK).unwrap();
        assert_eq!(reply.ttl, Some(64));
        assert!((reply.rtt_ms - 0.412).abs() < 1e-9);
    }

    #[test]
    fn parses_windows_reply() {
        let reply = parse_ping_output(WINDOWS_OK).unwrap();
        assert_eq!(reply.ttl, Some(128));
        assert!((reply.rtt_ms - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unreachable_is_not_a_reply() {
        assert_eq!(parse_ping_output(WINDOWS_UNREACHABLE), None);
        assert_eq!(parse_ping_output(""), None);
        assert_eq!(parse_ping_output("garbage output"), None);
    }

    #[test]
    fn args_follow_platform_dialect() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let posix = ping_args(PingFlavor::Posix, ip, Duration::from_millis(1500));
        assert_eq!(posix, vec!["-c", "2", "-W", "2", "10.0.0.1"]);
        let v6 = ping_args(PingFlavor::Posix, "::1".parse().unwrap(), Duration::from_millis(200));
        assert_eq!(v6, vec!["-c", "2", "-W", "1", "-6", "::1"]);
        let win = ping_args(PingFlavor::Windows, ip, Duration::from_millis(1500));
        assert_eq!(win, vec!["-n", "2", "-w", "1500", "-4", "10.0.0.1"]);
    }

    #[test]
    fn bsd_wait_is_in_milliseconds() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let bsd = ping_args(PingFlavor::Bsd, ip, Duration::from_millis(1500));
        assert_eq!(bsd, vec!["-c", "2", "-W", "1500", "10.0.0.1"]);
        assert_eq!(PingFlavor::Bsd.program(ip), "ping");

        let v6: IpAddr = "fe80::1".parse().unwrap();
        assert_eq!(ping_args(PingFlavor::Bsd, v6, Duration::from_millis(200)), vec!["-c", "2", "fe80::1"]);
        assert_eq!(PingFlavor::Bsd.program(v6), "ping6");
        assert_eq!(PingFlavor::Posix.program(v6), "ping");
    }
}
