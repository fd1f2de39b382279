use crate::banner::{self, MAX_BANNER_BYTES};
use crate::ports::well_known_service;
use crate::profile::ScanProfile;
use crate::throttle::ProgressThrottle;
use crate::types::{PortResult, Protocol, ScanMethod};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Probes ports on a single host with asynchronous TCP connects and, for a
/// small allow-list, UDP request/response exchanges.
///
/// - Limits concurrent sockets per host with a `Semaphore`.
/// - Bounds every connect and read with `tokio::time::timeout`.
/// - Never fails: every socket outcome is encoded in the returned `PortResult`.
#[derive(Debug, Clone)]
pub struct PortScanEngine {
    connect_timeout: Duration,
    banner_timeout: Duration,
    grab_banners: bool,
    workers: usize,
    cancel: CancellationToken,
}

impl PortScanEngine {
    pub fn new(profile: &ScanProfile, workers: usize, cancel: CancellationToken) -> Self {
        Self {
            connect_timeout: profile.port_timeout(),
            banner_timeout: profile.banner_timeout(),
            grab_banners: profile.banner_grab,
            workers: workers.max(1),
            cancel,
        }
    }

    /// Connect to one TCP port, grab a banner when `grab_banner` is set, and
    /// classify the outcome.
    pub async fn scan_port(&self, ip: IpAddr, port: u16, grab_banner: bool) -> PortResult {
        let addr = SocketAddr::new(ip, port);
        let start = Instant::now();
        let connect_res = time::timeout(self.connect_timeout, TcpStream::connect(addr)).await;
        let elapsed = elapsed_ms(start);

        let mut result = match connect_res {
            Ok(Ok(mut stream)) => {
                let mut open = PortResult::new(port, Protocol::Tcp, ScanMethod::TcpConnect);
                open.is_open = true;
                let raw = if grab_banner {
                    self.read_banner(&mut stream, port).await
                } else {
                    Vec::new()
                };
                classify_open(&mut open, &raw);
                open
            }
            Ok(Err(e)) => PortResult::new(port, Protocol::Tcp, tcp_failure(&e)),
            Err(_) => PortResult::new(port, Protocol::Tcp, ScanMethod::TcpTimeout),
        };
        if !result.is_open {
            result.service_name_guess = well_known_service(port).unwrap_or("Unknown").to_string();
        }
        result.response_time_ms = elapsed;
        result
    }

    /// Send the port's UDP probe and wait for any reply. Ports outside the
    /// allow-list are reported as skipped without sending anything.
    pub async fn scan_udp(&self, ip: IpAddr, port: u16) -> PortResult {
        let Some(probe) = banner::udp_probe(port) else {
            return PortResult::new(port, Protocol::Udp, ScanMethod::UdpSkipped);
        };
        let start = Instant::now();
        let mut result = match self.udp_exchange(ip, port, probe).await {
            Ok(Some(reply)) => {
                let mut open = PortResult::new(port, Protocol::Udp, ScanMethod::UdpResponse);
                open.is_open = true;
                classify_open(&mut open, &reply);
                open
            }
            Ok(None) => PortResult::new(port, Protocol::Udp, ScanMethod::UdpTimeout),
            Err(e) => PortResult::new(port, Protocol::Udp, ScanMethod::Error(format!("{:?}", e.kind()))),
        };
        if !result.is_open {
            result.service_name_guess = well_known_service(port).unwrap_or("Unknown").to_string();
        }
        result.response_time_ms = elapsed_ms(start);
        result
    }

    /// Scan `ports` on `ip` with at most `workers` sockets in flight.
    ///
    /// `on_progress(scanned, total)` is called with a non-decreasing count, at
    /// most once per throttle interval, and always for the final port. On
    /// cancellation no new socket is opened, in-flight probes are aborted and
    /// the results gathered so far are returned.
    pub async fn scan_ports<F>(
        &self,
        ip: IpAddr,
        ports: &[u16],
        protocol: Protocol,
        mut on_progress: F,
    ) -> Vec<PortResult>
    where
        F: FnMut(usize, usize),
    {
        let total = ports.len();
        let sem = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();

        for &port in ports {
            if self.cancel.is_cancelled() {
                break;
            }
            let engine = self.clone();
            let sem = sem.clone();
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                if engine.cancel.is_cancelled() {
                    return None;
                }
                let res = match protocol {
                    Protocol::Tcp => engine.scan_port(ip, port, engine.grab_banners).await,
                    Protocol::Udp => engine.scan_udp(ip, port).await,
                };
                Some(res)
            });
        }

        let throttle = ProgressThrottle::default();
        let mut results = Vec::with_capacity(total);
        let mut scanned = 0usize;
        loop {
            let joined = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(ip = %ip, scanned, total, "port scan cancelled");
                    set.abort_all();
                    break;
                }
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            match joined {
                Ok(Some(res)) => {
                    scanned += 1;
                    results.push(res);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(ip = %ip, "port probe task failed: {e}");
                    scanned += 1;
                }
            }
            if throttle.should_emit(scanned, total) {
                on_progress(scanned, total);
            }
        }
        results.sort_by_key(|r| r.port);
        results
    }

    /// Send the probe for `port` if one is known, then read what comes back.
    async fn read_banner(&self, stream: &mut TcpStream, port: u16) -> Vec<u8> {
        if let Some(probe) = banner::tcp_probe(port) {
            match time::timeout(self.banner_timeout, stream.write_all(probe)).await {
                Ok(Ok(())) => {}
                _ => return Vec::new(),
            }
        }
        let mut buf = vec![0u8; MAX_BANNER_BYTES];
        match time::timeout(self.banner_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                buf.truncate(n);
                buf
            }
            _ => Vec::new(),
        }
    }

    async fn udp_exchange(&self, ip: IpAddr, port: u16, probe: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let local = match ip {
            IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let sock = UdpSocket::bind(local).await?;
        sock.connect(SocketAddr::new(ip, port)).await?;
        sock.send(probe).await?;
        let mut buf = vec![0u8; MAX_BANNER_BYTES];
        match time::timeout(self.connect_timeout, sock.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}

/// Fill in the service, banner and version for an open port from its raw reply.
fn classify_open(result: &mut PortResult, raw: &[u8]) {
    result.service_name_guess = banner::identify_service(raw, result.port);
    if raw.is_empty() {
        return;
    }
    let text = banner::decode_banner(raw);
    if text.is_empty() {
        return;
    }
    result.version_guess = banner::extract_version(&text);
    result.banner = Some(text);
}

fn tcp_failure(e: &io::Error) -> ScanMethod {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ScanMethod::TcpRefused,
        io::ErrorKind::TimedOut => ScanMethod::TcpTimeout,
        kind => ScanMethod::Error(format!("{kind:?}")),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
