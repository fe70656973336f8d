use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::ReloadTrigger;
use crate::health::HealthState;
use crate::routing::table::ServerSummary;
use crate::upstream::TargetStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub generation: u64,
    pub servers: usize,
    pub routes: usize,
    pub targets: usize,
    pub degraded_targets: usize,
}

#[derive(Serialize)]
pub struct RoutesView {
    pub generation: u64,
    pub servers: Vec<ServerSummary>,
}

#[derive(Serialize)]
pub struct ReloadOutcome {
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let table = state.routes.load();
    let targets = state.pool.statuses();
    let degraded = targets.iter().filter(|t| t.state == HealthState::Degraded).count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if degraded == 0 { "operational" } else { "degraded" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        generation: table.generation(),
        servers: table.servers().len(),
        routes: table.route_count(),
        targets: targets.len(),
        degraded_targets: degraded,
    })
}

pub async fn get_targets(State(state): State<AdminState>) -> Json<Vec<TargetStatus>> {
    Json(state.pool.statuses())
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<RoutesView> {
    let table = state.routes.load();
    Json(RoutesView {
        generation: table.generation(),
        servers: table.summary(),
    })
}

/// 200 with the new generation, or 422 with the current one and the reason.
pub async fn post_reload(State(state): State<AdminState>) -> (StatusCode, Json<ReloadOutcome>) {
    let reloader = state.reloader.clone();
    let result = tokio::task::spawn_blocking(move || reloader.reload(ReloadTrigger::Admin)).await;

    match result {
        Ok(Ok(generation)) => (
            StatusCode::OK,
            Json(ReloadOutcome {
                generation,
                error: None,
            }),
        ),
        Ok(Err(e)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ReloadOutcome {
                generation: state.routes.generation(),
                error: Some(e.to_string()),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReloadOutcome {
                generation: state.routes.generation(),
                error: Some(e.to_string()),
            }),
        ),
    }
}
