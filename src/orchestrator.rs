//! Session lifecycle: bounded fan-out of host tasks, cancellation, failure
//! isolation and in-order event delivery.
use crate::aggregator::ResultSet;
use crate::banner;
use crate::detect::HostDetector;
use crate::error::OrchestratorError;
use crate::events::{Phase, ScanEvent};
use crate::netdetect::LocalNetwork;
use crate::oshint;
use crate::profile::ScanProfile;
use crate::resolve::HostnameResolver;
use crate::scanner::PortScanEngine;
use crate::types::{HostResult, Protocol, ScanSummary};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on sockets open at once across all host and port workers.
pub const MAX_CONCURRENT_SOCKETS: usize = 100;
/// How often finished tasks are pruned from the registry.
const REGISTRY_SWEEP: Duration = Duration::from_millis(250);

/// Host-level and per-host port-level parallelism for a session.
///
/// Hosts: `min(workers, targets, 100)`. Ports: `min(workers, ports, 100 / hosts)`.
/// Both are at least 1, so their product stays within [`MAX_CONCURRENT_SOCKETS`].
pub fn worker_split(parallel_workers: usize, targets: usize, ports: usize) -> (usize, usize) {
    let hosts = parallel_workers
        .min(targets)
        .min(MAX_CONCURRENT_SOCKETS)
        .max(1);
    let per_host = parallel_workers
        .min(ports)
        .min(MAX_CONCURRENT_SOCKETS / hosts)
        .max(1);
    (hosts, per_host)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Live state of one scan run, shared by the orchestrator, its tasks and handles.
#[derive(Debug)]
struct SessionState {
    total: usize,
    completed: AtomicUsize,
    cancel: CancellationToken,
    /// Non-owning handles of host tasks that may still be running.
    registry: Mutex<HashMap<u64, AbortHandle>>,
    finished: AtomicBool,
    results: ResultSet,
}

impl SessionState {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            registry: Mutex::new(HashMap::new()),
            finished: AtomicBool::new(false),
            results: ResultSet::new(),
        }
    }

    fn register(&self, id: u64, handle: AbortHandle) {
        if !handle.is_finished() {
            lock(&self.registry).insert(id, handle);
        }
    }

    fn deregister(&self, id: u64) {
        lock(&self.registry).remove(&id);
    }

    fn sweep(&self) -> usize {
        let mut registry = lock(&self.registry);
        registry.retain(|_, handle| !handle.is_finished());
        registry.len()
    }
}

/// Cloneable view of a session for observers that do not consume events.
#[derive(Debug, Clone)]
pub struct SessionControl {
    session: Arc<SessionState>,
}

impl SessionControl {
    /// Stop dispatching new hosts and ask in-flight work to wind down.
    pub fn cancel(&self) {
        if !self.session.cancel.is_cancelled() {
            info!("scan cancellation requested");
        }
        self.session.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.session.finished.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.session.total
    }

    pub fn completed(&self) -> usize {
        self.session.completed.load(Ordering::Acquire)
    }

    /// Host tasks that have been started and not yet pruned.
    pub fn in_flight(&self) -> usize {
        self.session.sweep()
    }

    pub fn results(&self) -> ResultSet {
        self.session.results.clone()
    }

    pub async fn summary(&self) -> ScanSummary {
        self.session
            .results
            .summary(self.total(), self.is_cancelled())
            .await
    }
}

/// Returned by [`ScanOrchestrator::start`]; the only receiver of the session's events.
#[derive(Debug)]
pub struct SessionHandle {
    events: UnboundedReceiver<ScanEvent>,
    control: SessionControl,
}

impl SessionHandle {
    /// Next event in emission order. `None` once the session is over and drained.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }

    /// Drain events until the session finishes, returning the final summary.
    pub async fn wait(mut self) -> ScanSummary {
        while let Some(event) = self.next_event().await {
            if matches!(event, ScanEvent::Finished { .. }) {
                break;
            }
        }
        self.control.summary().await
    }
}

/// Runs at most one scan session at a time.
#[derive(Debug, Default)]
pub struct ScanOrchestrator {
    current: Mutex<Option<Arc<SessionState>>>,
}

impl ScanOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin scanning `targets` with `profile`. Must be called inside a Tokio runtime.
    ///
    /// Rejects the call while a previous session is still running.
    pub fn start(
        &self,
        targets: Vec<IpAddr>,
        profile: ScanProfile,
    ) -> Result<SessionHandle, OrchestratorError> {
        let mut current = lock(&self.current);
        if current
            .as_ref()
            .is_some_and(|s| !s.finished.load(Ordering::Acquire))
        {
            return Err(OrchestratorError::AlreadyRunning);
        }
        if targets.is_empty() {
            return Err(OrchestratorError::NoTargets);
        }

        let session = Arc::new(SessionState::new(targets.len()));
        *current = Some(session.clone());
        drop(current);

        let ports = profile.ports.ports_to_scan();
        let (host_workers, port_workers) =
            worker_split(profile.parallel_workers, targets.len(), ports.len());
        info!(
            targets = targets.len(),
            ports = ports.len(),
            host_workers,
            port_workers,
            "starting scan session"
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let local = Arc::new(LocalNetwork::detect());
        let ctx = Arc::new(HostContext {
            detector: HostDetector::new(&profile, local, session.cancel.clone()),
            engine: PortScanEngine::new(&profile, port_workers, session.cancel.clone()),
            resolver: profile
                .resolve_hostnames
                .then(|| HostnameResolver::new(profile.dns_timeout())),
            ports,
            udp: profile.udp,
            cancel: session.cancel.clone(),
            events: event_tx.clone(),
        });

        tokio::spawn(dispatch(session.clone(), ctx, targets, host_workers, result_tx));
        tokio::spawn(aggregate(session.clone(), result_rx, event_tx));
        tokio::spawn(sweep_registry(session.clone()));

        Ok(SessionHandle {
            events: event_rx,
            control: SessionControl { session },
        })
    }

    pub fn cancel(&self, handle: &SessionHandle) {
        handle.cancel();
    }

    pub fn is_finished(&self, handle: &SessionHandle) -> bool {
        handle.is_finished()
    }

    /// Control of the most recent session, running or finished.
    pub fn current(&self) -> Option<SessionControl> {
        lock(&self.current)
            .as_ref()
            .map(|session| SessionControl {
                session: session.clone(),
            })
    }
}

/// Everything a host task needs, built once per session.
struct HostContext {
    detector: HostDetector,
    engine: PortScanEngine,
    resolver: Option<HostnameResolver>,
    ports: Vec<u16>,
    udp: bool,
    cancel: CancellationToken,
    events: UnboundedSender<ScanEvent>,
}

impl HostContext {
    fn emit(&self, event: ScanEvent) {
        // A dropped handle just means nobody is listening.
        let _ = self.events.send(event);
    }
}

async fn dispatch(
    session: Arc<SessionState>,
    ctx: Arc<HostContext>,
    targets: Vec<IpAddr>,
    host_workers: usize,
    results: UnboundedSender<HostResult>,
) {
    let sem = Arc::new(Semaphore::new(host_workers));
    for (id, ip) in (0u64..).zip(targets) {
        let permit = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            permit = sem.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let ctx = ctx.clone();
        let results = results.clone();
        let owner = session.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let events = ctx.events.clone();
            let result = isolate(ip, scan_host(ip, ctx), &events).await;
            let _ = results.send(result);
            owner.deregister(id);
        });
        session.register(id, handle.abort_handle());
    }
    if session.cancel.is_cancelled() {
        debug!("dispatch stopped by cancellation");
    }
}

/// Single reader of the results channel: counts, stores and publishes each host.
async fn aggregate(
    session: Arc<SessionState>,
    mut results: UnboundedReceiver<HostResult>,
    events: UnboundedSender<ScanEvent>,
) {
    while let Some(result) = results.recv().await {
        session.results.push(result.clone()).await;
        let completed = session.completed.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(ip = %result.ip, alive = result.alive, completed, "host finished");
        let _ = events.send(ScanEvent::HostResult(Box::new(result)));
    }

    let completed = session.completed.load(Ordering::Acquire);
    let cancelled = session.cancel.is_cancelled();
    session.finished.store(true, Ordering::Release);
    info!(completed, total = session.total, cancelled, "scan session finished");
    let _ = events.send(ScanEvent::Finished {
        completed,
        total: session.total,
        cancelled,
    });
}

async fn sweep_registry(session: Arc<SessionState>) {
    let mut ticker = time::interval(REGISTRY_SWEEP);
    while !session.finished.load(Ordering::Acquire) {
        ticker.tick().await;
        session.sweep();
    }
    lock(&session.registry).clear();
}

/// Run `work` as its own task so a panic inside it becomes a failed, down
/// `HostResult` plus a `ScanError` event instead of tearing down the session.
pub async fn isolate<F>(ip: IpAddr, work: F, events: &UnboundedSender<ScanEvent>) -> HostResult
where
    F: Future<Output = HostResult> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                "host task aborted".to_string()
            };
            warn!(ip = %ip, "host task failed: {message}");
            let _ = events.send(ScanEvent::ScanError {
                ip: ip.to_string(),
                message: message.clone(),
            });
            HostResult::failed(ip, message)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "host task panicked".to_string()
    }
}

/// Detect, resolve, scan ports, classify. Phase order is fixed; cancellation
/// is checked at each boundary and skips the remaining network phases.
async fn scan_host(ip: IpAddr, ctx: Arc<HostContext>) -> HostResult {
    let ip_str = ip.to_string();
    let mut host = HostResult::new(ip);

    ctx.emit(ScanEvent::progress(&ip_str, Phase::DetectingHost));
    let detection = ctx.detector.detect(ip).await;
    host.alive = detection.alive;
    host.response_time_ms = detection.response_time_ms;
    host.detection_method = detection.method;
    host.mac_address = detection.mac_address;
    if !host.alive {
        return host;
    }

    if let Some(resolver) = &ctx.resolver {
        if !ctx.cancel.is_cancelled() {
            ctx.emit(ScanEvent::progress(&ip_str, Phase::ResolvingHostname));
            host.hostname = resolver.lookup(ip).await;
        }
    }

    if !ctx.ports.is_empty() && !ctx.cancel.is_cancelled() {
        ctx.emit(ScanEvent::progress(&ip_str, Phase::ScanningPorts));
        let progress = |scanned, total| {
            ctx.emit(ScanEvent::PortProgress {
                ip: ip_str.clone(),
                scanned,
                total,
            })
        };
        for result in ctx
            .engine
            .scan_ports(ip, &ctx.ports, Protocol::Tcp, progress)
            .await
        {
            host.record_port(result);
        }

        if ctx.udp && !ctx.cancel.is_cancelled() {
            let udp_ports: Vec<u16> = ctx
                .ports
                .iter()
                .copied()
                .filter(|&p| banner::udp_probe(p).is_some())
                .collect();
            for result in ctx
                .engine
                .scan_ports(ip, &udp_ports, Protocol::Udp, |_, _| {})
                .await
            {
                host.record_port(result);
            }
        }
    }

    ctx.emit(ScanEvent::progress(&ip_str, Phase::Classifying));
    host.os_hint = oshint::guess(detection.ttl, &host.open_ports);
    host
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_budget_is_respected() {
        assert_eq!(worker_split(50, 254, 1024), (50, 2));
        assert_eq!(worker_split(50, 1, 1024), (1, 50));
        assert_eq!(worker_split(500, 1000, 1000), (100, 1));
        assert_eq!(worker_split(8, 3, 0), (3, 1));
        for (w, t, p) in [(1, 1, 1), (50, 10, 30), (100, 100, 100), (7, 1024, 237)] {
            let (hosts, ports) = worker_split(w, t, p);
            assert!(hosts * ports <= MAX_CONCURRENT_SOCKETS);
            assert!(hosts <= w && hosts >= 1);
        }
    }

    async fn exploding_host() -> HostResult {
        panic!("socket table exploded")
    }

    #[tokio::test]
    async fn panicking_task_becomes_failed_result() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        let result = isolate(ip, exploding_host(), &tx).await;
        assert!(!result.alive);
        assert_eq!(result.error.as_deref(), Some("socket table exploded"));
        match rx.recv().await {
            Some(ScanEvent::ScanError { ip, message }) => {
                assert_eq!(ip, "10.1.1.1");
                assert_eq!(message, "socket table exploded");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn registry_sweep_prunes_finished_tasks() {
        let session = SessionState::new(1);
        let done = tokio::spawn(async {});
        let pending = tokio::spawn(std::future::pending::<()>());
        let done_abort = done.abort_handle();
        done.await.unwrap();
        lock(&session.registry).insert(1, done_abort);
        session.register(2, pending.abort_handle());
        assert_eq!(session.sweep(), 1);
        pending.abort();
    }
}
