//! Request state machine.
//!
//! # Responsibilities
//! - Capture the route table snapshot when the request is accepted
//! - Enforce body limits before any upstream contact
//! - Match, then redirect or forward
//! - Rewrite headers and stream the response back
//! - Map every failure to exactly one response
//!
//! # Design Decisions
//! - The TLS handshake happens at the connection level, before any request
//!   exists; see `net::tls::HandshakeLogger`
//! - One global deadline per request: 504 before the response head, abort
//!   while streaming
//! - Upstream head timeout is the target's write + read timeout, since the
//!   request body is written while waiting for the head
//! - No retries, neither on the same target nor on another one

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, Response, StatusCode};
use http_body::Body as _;
use tokio::time::{self, Instant};

use crate::http::request::{origin_form, request_uri};
use crate::http::response;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::proxy::body::UpstreamBody;
use crate::proxy::context::{InboundScheme, Phase, RequestContext};
use crate::proxy::error::{ProxyError, TimeoutStage};
use crate::routing::{ProxyAction, RequestParts, RouteAction};
use crate::security::headers::{self, Forwarding};
use crate::security::limits;

/// Catch-all handler for both listeners.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let mut ctx = RequestContext::accept(&request, client, state.scheme, state.routes.load());
    let deadline = Instant::now() + state.request_timeout;

    let result = match time::timeout_at(deadline, handle(&state, &mut ctx, request, deadline)).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::Timeout {
            stage: TimeoutStage::Request,
        }),
    };

    let mut response = match result {
        Ok(response) => response,
        Err(err) => {
            ctx.fail(&err);
            response::status_page(err.status())
        }
    };

    if let Some(route) = &ctx.route {
        headers::apply_response_headers(response.headers_mut(), &route.response_headers);
    }
    metrics::record_request(
        ctx.method.as_str(),
        response.status().as_u16(),
        &ctx.route_id(),
        ctx.started,
    );
    response
}

async fn handle(
    state: &AppState,
    ctx: &mut RequestContext,
    request: Request<Body>,
    deadline: Instant,
) -> Result<Response<Body>, ProxyError> {
    limits::check_declared(request.headers(), state.max_body_size)?;

    // without a host only the default block can answer
    let route = match ctx.snapshot.lookup(&ctx.host, &ctx.path) {
        Some(route) => route,
        None if ctx.host.is_empty() => return Err(ProxyError::MissingHost),
        None => {
            return Err(ProxyError::NoRouteMatched {
                host: ctx.host.clone(),
            })
        }
    };
    ctx.matched(route.clone());

    if route.require_tls && ctx.scheme == InboundScheme::Http {
        if ctx.host.is_empty() {
            return Err(ProxyError::MissingHost);
        }
        let location = format!("https://{}{}", ctx.host, request_uri(request.uri()));
        return redirect(ctx, StatusCode::MOVED_PERMANENTLY, location);
    }

    match &route.action {
        RouteAction::Redirect { template, status } => {
            let location = template.expand(&RequestParts {
                scheme: ctx.scheme.as_str(),
                host: &ctx.host,
                path: &ctx.path,
                query: request.uri().query(),
            });
            redirect(ctx, *status, location)
        }
        RouteAction::NotFound => Err(ProxyError::NoRouteMatched {
            host: ctx.host.clone(),
        }),
        RouteAction::Proxy(action) => forward(state, ctx, action, request, deadline).await,
    }
}

fn redirect(
    ctx: &mut RequestContext,
    status: StatusCode,
    location: String,
) -> Result<Response<Body>, ProxyError> {
    let response = response::redirect(status, &location).map_err(|_| ProxyError::InvalidRedirect(location.clone()))?;
    tracing::debug!(request_id = %ctx.id, status = status.as_u16(), location = %location, "Redirecting");
    ctx.advance(Phase::Completed);
    Ok(response)
}

async fn forward(
    state: &AppState,
    ctx: &mut RequestContext,
    action: &ProxyAction,
    request: Request<Body>,
    deadline: Instant,
) -> Result<Response<Body>, ProxyError> {
    let (parts, body) = request.into_parts();

    let limit = action.target.max_body_size;
    let body = match limits::check_declared(&parts.headers, limit)? {
        Some(_) => body,
        None if body.is_end_stream() => body,
        None => Body::from(limits::buffer_within(body, limit).await?),
    };

    let target = state.pool.select(action)?;
    ctx.advance(Phase::Connecting);
    let mut conn = state.pool.acquire(target).await?;

    let target_authority = target.addr.authority();
    let forwarding = Forwarding {
        client_ip: ctx.client.ip(),
        scheme: ctx.scheme.as_str(),
        original_host: ctx.raw_host.as_ref(),
        target_authority: &target_authority,
        host_override: action.host_override.as_ref(),
        set_headers: &action.set_headers,
    };
    let mut upstream = Request::new(body);
    *upstream.method_mut() = parts.method;
    *upstream.uri_mut() = origin_form(&parts.uri);
    *upstream.headers_mut() = headers::forward_request_headers(&parts.headers, &forwarding);

    ctx.advance(Phase::Forwarding);
    tracing::debug!(
        request_id = %ctx.id,
        route = %ctx.route_id(),
        target_addr = %target.addr,
        "Forwarding request"
    );

    let head_timeout = target.write_timeout + target.read_timeout;
    let sent = time::timeout(head_timeout, conn.send(upstream)).await;
    let response = match sent {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            conn.report_failure(&e);
            return Err(e.into());
        }
        Err(_) => {
            let err = ProxyError::Timeout {
                stage: TimeoutStage::UpstreamResponse,
            };
            conn.report_failure(&err);
            return Err(err);
        }
    };
    conn.report_success();

    let (mut head, incoming) = response.into_parts();
    headers::strip_hop_by_hop(&mut head.headers);
    tracing::debug!(
        request_id = %ctx.id,
        status = head.status.as_u16(),
        target_addr = %target.addr,
        "Upstream responded"
    );

    let body = UpstreamBody::new(incoming, conn, deadline, target.read_timeout, ctx.id.clone());
    Ok(Response::from_parts(head, Body::new(body)))
}
