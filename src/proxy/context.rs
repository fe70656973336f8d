//! Per-request state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderValue, Method, Request};
use uuid::Uuid;

use crate::http::request::{raw_host, request_id};
use crate::observability::metrics;
use crate::proxy::error::ProxyError;
use crate::routing::{normalize_host, normalize_path, Route, RouteTable};

/// The scheme a listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundScheme {
    Http,
    Https,
}

impl InboundScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            InboundScheme::Http => "http",
            InboundScheme::Https => "https",
        }
    }
}

/// `Accepted -> Matched -> Connecting -> Forwarding -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accepted,
    Matched,
    Connecting,
    Forwarding,
    Completed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Accepted => "accepted",
            Phase::Matched => "matched",
            Phase::Connecting => "connecting",
            Phase::Forwarding => "forwarding",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        })
    }
}

/// Owned by the handling task; dropped when the request ends.
pub struct RequestContext {
    pub id: String,
    pub method: Method,
    /// Normalised path used for matching and `$uri`.
    pub path: String,
    pub scheme: InboundScheme,
    pub client: SocketAddr,
    /// Host as sent by the client, port included.
    pub raw_host: Option<HeaderValue>,
    /// Normalised host used for matching and redirects.
    pub host: String,
    /// The table this request is matched against for its whole lifetime.
    pub snapshot: Arc<RouteTable>,
    pub route: Option<Arc<Route>>,
    pub phase: Phase,
    pub started: Instant,
}

impl RequestContext {
    pub fn accept(
        request: &Request<Body>,
        client: SocketAddr,
        scheme: InboundScheme,
        snapshot: Arc<RouteTable>,
    ) -> Self {
        let raw_host = raw_host(request);
        let host = raw_host
            .as_ref()
            .and_then(|h| h.to_str().ok())
            .map(normalize_host)
            .unwrap_or_default();

        let ctx = Self {
            // the request-id layer normally sets it; direct callers may not
            id: request_id(request.headers())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            method: request.method().clone(),
            path: normalize_path(request.uri().path()).into_owned(),
            scheme,
            client,
            raw_host,
            host,
            snapshot,
            route: None,
            phase: Phase::Accepted,
            started: Instant::now(),
        };
        tracing::debug!(
            request_id = %ctx.id,
            client = %ctx.client,
            scheme = ctx.scheme.as_str(),
            method = %ctx.method,
            host = %ctx.host,
            path = %ctx.path,
            generation = ctx.snapshot.generation(),
            "Request accepted"
        );
        ctx
    }

    pub fn advance(&mut self, phase: Phase) {
        self.phase = phase;
        tracing::trace!(request_id = %self.id, route = %self.route_id(), phase = %phase, "Phase");
    }

    pub fn matched(&mut self, route: Arc<Route>) {
        self.route = Some(route);
        self.advance(Phase::Matched);
    }

    pub fn fail(&mut self, err: &ProxyError) {
        self.phase = Phase::Failed;
        metrics::record_failure(err.kind());
        if err.status().is_server_error() {
            tracing::warn!(
                request_id = %self.id,
                kind = err.kind(),
                host = %self.host,
                path = %self.path,
                route = %self.route_id(),
                error = %err,
                "Request failed"
            );
        } else {
            tracing::info!(
                request_id = %self.id,
                kind = err.kind(),
                host = %self.host,
                path = %self.path,
                route = %self.route_id(),
                error = %err,
                "Request rejected"
            );
        }
    }

    pub fn route_id(&self) -> String {
        self.route
            .as_ref()
            .map(|r| r.id().to_string())
            .unwrap_or_else(|| "none".to_string())
    }
}
