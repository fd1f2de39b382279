use std::{net::IpAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    error::OrchestratorError,
    orchestrator::{ScanOrchestrator, SessionControl},
    ports::NamedRange,
    profile::{PortSelection, ProfileKind},
    targets::{self, TargetSpec},
};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<ScanOrchestrator>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub total: usize,
    pub completed: usize,
    pub in_flight: usize,
    pub state: String, // "idle" | "running" | "done" | "cancelled"
}

impl Status {
    fn idle() -> Self {
        Self {
            state: "idle".into(),
            ..Self::default()
        }
    }

    fn of(control: &SessionControl) -> Self {
        let state = match (control.is_finished(), control.is_cancelled()) {
            (false, _) => "running",
            (true, true) => "cancelled",
            (true, false) => "done",
        };
        Self {
            total: control.total(),
            completed: control.completed(),
            in_flight: control.in_flight(),
            state: state.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanRequest {
    /// `10.0.0.7`, `10.0.0.0/24` or `10.0.0.1-10.0.0.9`.
    pub targets: Vec<String>,
    #[serde(default)]
    pub profile: Option<ProfileKind>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
    #[serde(default)]
    pub port_range: Option<NamedRange>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub port_timeout_ms: Option<u64>,
    #[serde(default)]
    pub udp: Option<bool>,
}

pub fn router(orchestrator: Arc<ScanOrchestrator>) -> Router {
    let state = AppState { orchestrator };
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, orchestrator: Arc<ScanOrchestrator>) -> Result<()> {
    let app = router(orchestrator);
    info!("serving control API on http://{bind}");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let status = app
        .orchestrator
        .current()
        .map(|c| Status::of(&c))
        .unwrap_or_else(Status::idle);
    (StatusCode::OK, Json(status))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    match app.orchestrator.current() {
        Some(control) => (StatusCode::OK, Json(control.summary().await)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    match app.orchestrator.current() {
        Some(control) if !control.is_finished() => {
            control.cancel();
            (StatusCode::ACCEPTED, Json(Status::of(&control))).into_response()
        }
        _ => (StatusCode::CONFLICT, "no scan is running").into_response(),
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let mut specs = Vec::with_capacity(req.targets.len());
    for t in &req.targets {
        match t.parse::<TargetSpec>() {
            Ok(spec) => specs.push(spec),
            Err(e) => return (StatusCode::BAD_REQUEST, format!("{t}: {e}")).into_response(),
        }
    }
    let all_ips: Vec<IpAddr> = match targets::expand_all(&specs) {
        Ok(ips) => ips,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let mut profile = req.profile.unwrap_or(ProfileKind::Custom).profile();
    if let Some(list) = req.ports {
        profile.ports = PortSelection::List(list);
    } else if let Some(named) = req.port_range {
        profile.ports = PortSelection::Named(named);
    }
    if let Some(w) = req.workers {
        profile.parallel_workers = w.max(1);
    }
    if let Some(ms) = req.timeout_ms {
        profile.timeout_ms = ms;
    }
    if let Some(ms) = req.port_timeout_ms {
        profile.port_timeout_ms = ms;
    }
    if let Some(udp) = req.udp {
        profile.udp = udp;
    }

    let handle = match app.orchestrator.start(all_ips, profile) {
        Ok(handle) => handle,
        Err(e @ OrchestratorError::AlreadyRunning) => {
            return (StatusCode::CONFLICT, e.to_string()).into_response()
        }
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let control = handle.control();

    // Nobody streams events over HTTP; drain them so the session can complete.
    tokio::spawn(async move {
        let summary = handle.wait().await;
        if summary.cancelled {
            warn!(completed = summary.completed, total = summary.total, "scan cancelled");
        } else {
            info!(alive = summary.alive, total = summary.total, "scan done");
        }
    });

    (StatusCode::ACCEPTED, Json(Status::of(&control))).into_response()
}
