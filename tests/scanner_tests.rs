use lan_sweep_rs::profile::ScanProfile;
use lan_sweep_rs::scanner::PortScanEngine;
use lan_sweep_rs::types::{Protocol, ScanMethod};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn engine(cancel: CancellationToken) -> PortScanEngine {
    let mut profile = ScanProfile::custom();
    profile.port_timeout_ms = 1_000;
    PortScanEngine::new(&profile, 8, cancel)
}

/// A port number that nothing is listening on right now.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn greeting_server(greeting: &'static [u8]) -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let _ = sock.write_all(greeting).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });
    port
}

#[tokio::test]
async fn ssh_banner_is_identified() {
    let port = greeting_server(b"SSH-2.0-OpenSSH_8.9\r\n").await;
    let res = engine(CancellationToken::new()).scan_port(LOCALHOST, port, true).await;
    assert!(res.is_open);
    assert_eq!(res.scan_method, ScanMethod::TcpConnect);
    assert_eq!(res.service_name_guess, "SSH");
    assert_eq!(res.version_guess.as_deref(), Some("8.9"));
    assert_eq!(res.banner.as_deref(), Some("SSH-2.0-OpenSSH_8.9"));
}

#[tokio::test]
async fn closed_local_port_is_refused() {
    let port = closed_port().await;
    let mut profile = ScanProfile::custom();
    profile.port_timeout_ms = 200;
    let engine = PortScanEngine::new(&profile, 1, CancellationToken::new());
    let res = engine.scan_port(LOCALHOST, port, true).await;
    assert!(!res.is_open);
    assert_eq!(res.scan_method, ScanMethod::TcpRefused);
    assert_eq!(res.banner, None);
}

#[tokio::test]
async fn banner_grab_can_be_disabled() {
    let port = greeting_server(b"SSH-2.0-OpenSSH_8.9\r\n").await;
    let res = engine(CancellationToken::new()).scan_port(LOCALHOST, port, false).await;
    assert!(res.is_open);
    assert_eq!(res.banner, None);
    assert_eq!(res.service_name_guess, "Unknown");
}

#[tokio::test]
async fn profile_banner_flag_applies_to_batch_scans() {
    let port = greeting_server(b"SSH-2.0-OpenSSH_8.9\r\n").await;
    let mut profile = ScanProfile::custom();
    profile.banner_grab = false;
    profile.port_timeout_ms = 1_000;
    let engine = PortScanEngine::new(&profile, 1, CancellationToken::new());
    let results = engine
        .scan_ports(LOCALHOST, &[port], Protocol::Tcp, |_, _| {})
        .await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_open);
    assert_eq!(results[0].banner, None);
}

#[tokio::test]
async fn udp_outside_allow_list_is_skipped() {
    let res = engine(CancellationToken::new()).scan_udp(LOCALHOST, 12345).await;
    assert!(!res.is_open);
    assert_eq!(res.protocol, Protocol::Udp);
    assert_eq!(res.scan_method, ScanMethod::UdpSkipped);
}

#[tokio::test]
async fn udp_allow_listed_port_reply_then_silence() {
    // SSDP's port; skip quietly when something else on the box holds it.
    let Ok(server) = UdpSocket::bind((Ipv4Addr::LOCALHOST, 1900)).await else {
        return;
    };
    let echo = tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((n, peer)) = server.recv_from(&mut buf).await {
            let _ = server.send_to(&buf[..n], peer).await;
        }
    });

    let res = engine(CancellationToken::new()).scan_udp(LOCALHOST, 1900).await;
    assert_eq!(res.scan_method, ScanMethod::UdpResponse);
    assert!(res.is_open);
    assert_eq!(res.protocol, Protocol::Udp);
    assert_eq!(res.service_name_guess, "HTTP");
    assert!(res.banner.as_deref().is_some_and(|b| b.starts_with("M-SEARCH")));

    echo.abort();
    let _ = echo.await;
    let Ok(_silent) = UdpSocket::bind((Ipv4Addr::LOCALHOST, 1900)).await else {
        return;
    };
    let mut profile = ScanProfile::custom();
    profile.port_timeout_ms = 200;
    let res = PortScanEngine::new(&profile, 1, CancellationToken::new())
        .scan_udp(LOCALHOST, 1900)
        .await;
    assert_eq!(res.scan_method, ScanMethod::UdpTimeout);
    assert!(!res.is_open);
}

#[tokio::test]
async fn udp_port_unreachable_is_an_error() {
    // Syslog is allow-listed; nothing listens on it in a test environment.
    if std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 514)).is_err() {
        return;
    }
    let res = engine(CancellationToken::new()).scan_udp(LOCALHOST, 514).await;
    assert!(!res.is_open);
    assert_eq!(res.scan_method, ScanMethod::Error("ConnectionRefused".into()));
    assert_eq!(res.scan_method.to_string(), "ERROR:ConnectionRefused");
}

#[tokio::test]
async fn port_progress_is_monotonic_and_completes() {
    let mut ports = Vec::new();
    for _ in 0..30 {
        ports.push(closed_port().await);
    }
    ports.push(greeting_server(b"hello\r\n").await);
    ports.sort_unstable();
    ports.dedup();

    let mut seen = Vec::new();
    let results = engine(CancellationToken::new())
        .scan_ports(LOCALHOST, &ports, Protocol::Tcp, |scanned, total| {
            seen.push((scanned, total))
        })
        .await;

    assert_eq!(results.len(), ports.len());
    assert_eq!(results.iter().filter(|r| r.is_open).count(), 1);
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(seen.last(), Some(&(ports.len(), ports.len())));
}

#[tokio::test]
async fn cancelled_scan_opens_no_sockets() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = engine(cancel)
        .scan_ports(LOCALHOST, &[port], Protocol::Tcp, |_, _| {})
        .await;
    assert!(results.is_empty());

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "a connection was made after cancellation");
}
