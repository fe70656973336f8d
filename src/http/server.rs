//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router around the proxy handler
//! - Serve HTTP/1.1 and HTTP/2 on the plain and TLS listeners
//! - Wire up middleware (concurrency limit, request ID, tracing)
//! - Share one graceful-shutdown handle between listeners

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::request::request_id_layers;
use crate::net::tls::HandshakeLogger;
use crate::proxy::{proxy_handler, InboundScheme};
use crate::routing::RouteTableHandle;
use crate::upstream::UpstreamPool;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTableHandle>,
    pub pool: Arc<UpstreamPool>,
    /// Scheme of the listener the request arrived on.
    pub scheme: InboundScheme,
    /// Global cap, checked before matching.
    pub max_body_size: u64,
    pub request_timeout: Duration,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    state: AppState,
    in_flight: Arc<Semaphore>,
    handle: Handle,
}

impl HttpServer {
    pub fn new(
        config: &ProxyConfig,
        routes: Arc<RouteTableHandle>,
        pool: Arc<UpstreamPool>,
        handle: Handle,
    ) -> Self {
        let state = AppState {
            routes,
            pool,
            scheme: InboundScheme::Http,
            max_body_size: config.listener.max_body_size.as_u64(),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };
        Self {
            state,
            in_flight: Arc::new(Semaphore::new(config.listener.max_connections)),
            handle,
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self, scheme: InboundScheme) -> Router {
        let state = AppState {
            scheme,
            ..self.state.clone()
        };
        let (set_request_id, propagate_request_id) = request_id_layers();

        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(self.in_flight.clone(), limit_in_flight))
                    .layer(set_request_id)
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id),
            )
    }

    /// Serve plain HTTP until the shared handle shuts down.
    pub async fn serve_plain(&self, listener: TcpListener) -> io::Result<()> {
        let app = self
            .router(InboundScheme::Http)
            .into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!(address = ?listener.local_addr().ok(), "HTTP server starting");
        axum_server::from_tcp(listener)
            .handle(self.handle.clone())
            .serve(app)
            .await?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS until the shared handle shuts down.
    pub async fn serve_tls(&self, listener: TcpListener, tls: RustlsConfig) -> io::Result<()> {
        let app = self
            .router(InboundScheme::Https)
            .into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!(address = ?listener.local_addr().ok(), "HTTPS server starting");
        axum_server::from_tcp(listener)
            .acceptor(HandshakeLogger::new(tls))
            .handle(self.handle.clone())
            .serve(app)
            .await?;
        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Backpressure: past `max_connections` in-flight requests, new ones wait.
/// A request stays in flight until its response body is finished or dropped.
async fn limit_in_flight(State(in_flight): State<Arc<Semaphore>>, request: Request, next: Next) -> Response {
    let permit = in_flight.acquire_owned().await.ok();
    next.run(request)
        .await
        .map(|body| Body::new(PermittedBody { inner: body, _permit: permit }))
}

/// Response body that releases its in-flight permit when dropped.
struct PermittedBody {
    inner: Body,
    _permit: Option<OwnedSemaphorePermit>,
}

impl HttpBody for PermittedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
