use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lan_sweep_rs::events::ScanEvent;
use lan_sweep_rs::orchestrator::ScanOrchestrator;
use lan_sweep_rs::ports::{self, NamedRange};
use lan_sweep_rs::profile::{DetectionStrategy, PortSelection, ProfileKind, ScanProfile};
use lan_sweep_rs::targets::{self, TargetSpec};
use lan_sweep_rs::types::ScanSummary;
use lan_sweep_rs::{netdetect, server};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// lan-sweep-rs: find live hosts on a LAN and identify the services they expose.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-sweep-rs",
    version,
    about = "Async LAN host discovery and service scanner (ICMP/TCP/ARP liveness, banner-based service identification).",
    long_about = None
)]
struct Cli {
    /// Start address, CIDR block (e.g., 192.168.1.0/24) or `start-end`. If omitted, auto-detect local /24s.
    target: Option<String>,

    /// Inclusive end address when TARGET is a single start address.
    end: Option<String>,

    /// Built-in profile to start from.
    #[arg(long, value_enum, default_value_t = ProfileKind::Custom)]
    profile: ProfileKind,

    /// Load the whole profile from a JSON file instead of a preset.
    #[arg(long = "profile-file", conflicts_with = "profile")]
    profile_file: Option<PathBuf>,

    /// Ports to scan, e.g. "22,80,8000-8010".
    #[arg(long, conflicts_with_all = ["ports_file", "port_range", "no_ports"])]
    ports: Option<String>,

    /// Path to ports list file (one port or range per line).
    #[arg(long = "ports-file", conflicts_with_all = ["port_range", "no_ports"])]
    ports_file: Option<PathBuf>,

    /// Named port set.
    #[arg(long = "port-range", value_enum, conflicts_with = "no_ports")]
    port_range: Option<NamedRange>,

    /// Host discovery only.
    #[arg(long = "no-ports", default_value_t = false)]
    no_ports: bool,

    /// Detection methods, in the order they are tried.
    #[arg(long, value_enum, value_delimiter = ',')]
    methods: Option<Vec<DetectionStrategy>>,

    /// Host detection timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "port-timeout-ms")]
    port_timeout_ms: Option<u64>,

    /// Reverse DNS timeout in milliseconds.
    #[arg(long = "dns-timeout-ms")]
    dns_timeout_ms: Option<u64>,

    /// Hosts scanned in parallel.
    #[arg(long)]
    workers: Option<usize>,

    /// Skip banner grabbing on open ports.
    #[arg(long = "no-banner", default_value_t = false)]
    no_banner: bool,

    /// Also probe allow-listed UDP ports.
    #[arg(long, default_value_t = false)]
    udp: bool,

    /// Do not resolve hostnames.
    #[arg(long = "no-dns", default_value_t = false)]
    no_dns: bool,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start the HTTP control API.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the HTTP control API.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let profile = build_profile(&cli)?;
    let orchestrator = Arc::new(ScanOrchestrator::new());

    if cli.serve_ui {
        let bind = cli.bind.clone();
        let orch = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, orch).await {
                eprintln!("HTTP control server error: {e}");
            }
        });
        println!("Control API at http://{}/api (Ctrl+C to stop)", cli.bind);
        if cli.target.is_none() {
            let _ = tokio::signal::ctrl_c().await;
            return Ok(());
        }
    }

    let targets = resolve_targets(&cli)?;

    println!("lan-sweep-rs configuration:");
    println!("  targets      : {}", targets.len());
    println!("  ports        : {}", describe_ports(&profile.ports));
    println!("  methods      : {:?}", profile.methods);
    println!("  workers      : {}", profile.parallel_workers);
    println!("  timeout_ms   : {} (port {})", profile.timeout_ms, profile.port_timeout_ms);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );

    let mut handle = orchestrator
        .start(targets, profile)
        .context("failed to start scan")?;
    let control = handle.control();

    // Ctrl-C stops the scan; partial results are still printed.
    let on_ctrlc = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrlc.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        match event {
            ScanEvent::HostResult(host) if host.alive => {
                println!(
                    "  up   {:<16} {:<8} {}",
                    host.ip,
                    host.detection_method.to_string(),
                    host.hostname
                );
            }
            ScanEvent::ScanError { ip, message } => eprintln!("  error {ip}: {message}"),
            ScanEvent::Finished {
                completed,
                total,
                cancelled,
            } => {
                if cancelled {
                    println!("Scan cancelled after {completed}/{total} hosts.");
                }
                break;
            }
            _ => {}
        }
    }

    let summary = control.summary().await;
    print_results_table(&summary);
    if let Some(path) = cli.output.as_deref() {
        if let Err(e) = write_results_json(path, &summary) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON results to {}", path.display());
        }
    }

    if cli.serve_ui {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
    }

    Ok(())
}

fn build_profile(cli: &Cli) -> Result<ScanProfile> {
    let mut profile = match cli.profile_file.as_deref() {
        Some(path) => ScanProfile::from_json_path(path)?,
        None => cli.profile.profile(),
    };

    if let Some(list) = cli.ports.as_deref() {
        profile.ports = PortSelection::List(ports::parse_ports_str(list).context("invalid --ports")?);
    } else if let Some(path) = cli.ports_file.as_deref() {
        profile.ports = PortSelection::List(ports::load_ports_from_path(path)?);
    } else if let Some(named) = cli.port_range {
        profile.ports = PortSelection::Named(named);
    } else if cli.no_ports {
        profile.ports = PortSelection::None;
    }

    if let Some(methods) = &cli.methods {
        profile.methods = methods.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        profile.timeout_ms = ms;
    }
    if let Some(ms) = cli.port_timeout_ms {
        profile.port_timeout_ms = ms;
    }
    if let Some(ms) = cli.dns_timeout_ms {
        profile.dns_timeout_ms = ms;
    }
    if let Some(w) = cli.workers {
        profile.parallel_workers = w.max(1);
    }
    if cli.no_banner {
        profile.banner_grab = false;
    }
    if cli.udp {
        profile.udp = true;
    }
    if cli.no_dns {
        profile.resolve_hostnames = false;
    }
    Ok(profile)
}

fn resolve_targets(cli: &Cli) -> Result<Vec<IpAddr>> {
    let specs = match cli.target.as_deref() {
        Some(start) if cli.end.is_some() => vec![TargetSpec::parse(start, cli.end.as_deref())?],
        Some(arg) => vec![arg.parse::<TargetSpec>()?],
        None => {
            let cidrs = netdetect::detect_local_cidrs().context("failed to detect local networks")?;
            println!("Detected local IPv4 CIDRs:");
            for cidr in &cidrs {
                println!("  - {cidr}");
            }
            cidrs.into_iter().map(TargetSpec::Cidr).collect()
        }
    };
    let ips = targets::expand_all(&specs)?;
    anyhow::ensure!(!ips.is_empty(), "no targets to scan");
    Ok(ips)
}

fn describe_ports(sel: &PortSelection) -> String {
    match sel {
        PortSelection::None => "<none>".to_string(),
        PortSelection::Named(named) => format!("{named:?} ({} ports)", named.ports().len()),
        PortSelection::Range { start, end } => format!("{start}-{end}"),
        PortSelection::List(list) => format!("{} listed", list.len()),
    }
}

const HOSTNAME_COLUMN: usize = 40;

// PTR names may carry UTF-8 labels; cut on characters, not bytes.
fn clip(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn print_results_table(summary: &ScanSummary) {
    let alive: Vec<_> = summary.hosts.iter().filter(|h| h.alive).collect();

    let mut ip_w = "ip".len();
    let mut host_w = "hostname".len();
    let mut os_w = "os".len();
    for h in &alive {
        ip_w = ip_w.max(h.ip.len());
        host_w = host_w.max(h.hostname.chars().count().min(HOSTNAME_COLUMN));
        os_w = os_w.max(h.os_hint.len());
    }
    let method_w = 8usize;
    let rtt_w = "rtt_ms".len().max(8);

    println!(
        "\nAlive hosts: {} of {} (completed: {})",
        alive.len(),
        summary.total,
        summary.completed
    );
    println!(
        "{:<ip_w$}  {:<host_w$}  {:<method_w$}  {:>rtt_w$}  {:<os_w$}  open ports",
        "ip", "hostname", "method", "rtt_ms", "os",
    );
    println!(
        "{:-<ip_w$}  {:-<host_w$}  {:-<method_w$}  {:-<rtt_w$}  {:-<os_w$}  ----------",
        "", "", "", "", "",
    );
    for h in &alive {
        let name = clip(&h.hostname, HOSTNAME_COLUMN);
        let open: Vec<String> = h.open_ports.iter().map(u16::to_string).collect();
        println!(
            "{:<ip_w$}  {:<host_w$}  {:<method_w$}  {:>rtt_w$.1}  {:<os_w$}  {}",
            h.ip,
            name,
            h.detection_method.to_string(),
            h.response_time_ms,
            h.os_hint,
            open.join(","),
        );
        for p in h.port_details.values().chain(h.udp_details.values()).filter(|p| p.is_open) {
            println!(
                "    {:>5}/{:<3} {:<12} {:<12} {}",
                p.port,
                format!("{:?}", p.protocol).to_lowercase(),
                p.service_name_guess,
                p.version_guess.as_deref().unwrap_or("-"),
                p.banner.as_deref().unwrap_or(""),
            );
        }
    }
}

fn write_results_json(path: &Path, summary: &ScanSummary) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lan_sweep_rs::types::HostResult;

    #[test]
    fn clip_respects_char_boundaries() {
        let name = format!("{}é.lan", "a".repeat(39));
        let clipped = clip(&name, HOSTNAME_COLUMN);
        assert_eq!(clipped.chars().count(), 40);
        assert!(clipped.ends_with('é'));
        assert_eq!(clip("nas.lan", HOSTNAME_COLUMN), "nas.lan");
    }

    #[test]
    fn table_prints_non_ascii_hostnames() {
        let mut host = HostResult::new("192.168.1.20".parse().unwrap());
        host.alive = true;
        host.hostname = format!("{}é.lan", "a".repeat(39));
        let summary = ScanSummary {
            total: 1,
            completed: 1,
            alive: 1,
            cancelled: false,
            hosts: vec![host],
        };
        print_results_table(&summary);
    }
}
