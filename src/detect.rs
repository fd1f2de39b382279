//! Host liveness detection: self check, then ICMP, TCP connect and ARP in
//! profile order, stopping at the first method that succeeds.
use crate::arp;
use crate::icmp;
use crate::netdetect::LocalNetwork;
use crate::profile::{DetectionStrategy, ScanProfile};
use crate::types::DetectionMethod;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ports tried, in order, by the TCP-connect liveness stage.
pub const TCP_PING_PORTS: [u16; 10] = [80, 443, 22, 3389, 445, 135, 8080, 21, 25, 110];

/// Reported round trip for loopback / own addresses.
const SELF_RTT_MS: f64 = 0.1;

/// Terminal state of the detection state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub alive: bool,
    pub method: DetectionMethod,
    pub response_time_ms: f64,
    /// TTL from the ICMP reply, when ICMP was the successful stage.
    pub ttl: Option<u8>,
    pub mac_address: Option<String>,
}

impl Detection {
    fn down() -> Self {
        Self {
            alive: false,
            method: DetectionMethod::None,
            response_time_ms: 0.0,
            ttl: None,
            mac_address: None,
        }
    }

    fn alive(method: DetectionMethod, response_time_ms: f64) -> Self {
        Self {
            alive: true,
            method,
            response_time_ms,
            ttl: None,
            mac_address: None,
        }
    }
}

/// Decides whether a single target is reachable.
#[derive(Debug, Clone)]
pub struct HostDetector {
    local: Arc<LocalNetwork>,
    methods: Vec<DetectionStrategy>,
    timeout: Duration,
    tcp_stage_timeout: Duration,
    cancel: CancellationToken,
}

impl HostDetector {
    pub fn new(profile: &ScanProfile, local: Arc<LocalNetwork>, cancel: CancellationToken) -> Self {
        Self {
            local,
            methods: profile.methods.clone(),
            timeout: profile.timeout(),
            // Each TCP ping port gets half the detection timeout.
            tcp_stage_timeout: (profile.timeout() / 2).max(Duration::from_millis(1)),
            cancel,
        }
    }

    /// Run the detection stages for `ip`.
    ///
    /// Each stage checks the cancellation token before starting; a stage already
    /// running is allowed to finish. Stage failures fall through to the next stage.
    pub async fn detect(&self, ip: IpAddr) -> Detection {
        if self.local.is_self(ip) {
            return Detection::alive(DetectionMethod::SelfHost, SELF_RTT_MS);
        }
        let is_local = self.local.is_local_subnet(ip);
        let start = Instant::now();

        for method in &self.methods {
            if self.cancel.is_cancelled() {
                debug!(ip = %ip, "detection cancelled");
                break;
            }
            let found = match method {
                DetectionStrategy::Icmp => self.try_icmp(ip).await,
                DetectionStrategy::Tcp => self.try_tcp(ip, start).await,
                DetectionStrategy::Arp if is_local => self.try_arp(ip, start).await,
                DetectionStrategy::Arp => None,
            };
            if let Some(mut detection) = found {
                if is_local {
                    self.attach_mac(ip, &mut detection).await;
                }
                debug!(ip = %ip, method = %detection.method, "host is alive");
                return detection;
            }
        }
        Detection::down()
    }

    // ARP cache lookup for a host already found alive; skipped once cancelled.
    async fn attach_mac(&self, ip: IpAddr, detection: &mut Detection) {
        if detection.mac_address.is_some() || self.cancel.is_cancelled() {
            return;
        }
        if let IpAddr::V4(v4) = ip {
            detection.mac_address = arp::lookup_mac(v4, self.timeout).await;
        }
    }

    async fn try_icmp(&self, ip: IpAddr) -> Option<Detection> {
        let reply = icmp::ping(ip, self.timeout).await?;
        let mut detection = Detection::alive(DetectionMethod::Icmp, reply.rtt_ms);
        detection.ttl = reply.ttl;
        Some(detection)
    }

    async fn try_tcp(&self, ip: IpAddr, start: Instant) -> Option<Detection> {
        for port in TCP_PING_PORTS {
            if self.cancel.is_cancelled() {
                return None;
            }
            let addr = SocketAddr::new(ip, port);
            let connect = time::timeout(self.tcp_stage_timeout, TcpStream::connect(addr));
            let res = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                res = connect => res,
            };
            if let Ok(Ok(_stream)) = res {
                return Some(Detection::alive(
                    DetectionMethod::Tcp(port),
                    elapsed_ms(start),
                ));
            }
        }
        None
    }

    async fn try_arp(&self, ip: IpAddr, start: Instant) -> Option<Detection> {
        let IpAddr::V4(v4) = ip else {
            return None;
        };
        let mac = arp::probe(v4, self.timeout).await?;
        let mut detection = Detection::alive(DetectionMethod::Arp, elapsed_ms(start));
        detection.mac_address = Some(mac);
        Some(detection)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
