//! Admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: version, uptime, installed generation, counts
//! - `GET /admin/targets`: per-target health and connection counts
//! - `GET /admin/routes`: compiled server blocks and their rules
//! - `POST /admin/reload`: recompile the config file now
//!
//! Every endpoint requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::lifecycle::Reloader;
use crate::routing::RouteTableHandle;
use crate::upstream::UpstreamPool;

use self::auth::admin_auth_middleware;
use self::handlers::{get_routes, get_status, get_targets, post_reload};

#[derive(Clone)]
pub struct AdminState {
    pub routes: Arc<RouteTableHandle>,
    pub pool: Arc<UpstreamPool>,
    pub reloader: Arc<Reloader>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/targets", get(get_targets))
        .route("/admin/routes", get(get_routes))
        .route("/admin/reload", post(post_reload))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
