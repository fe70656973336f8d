//! Startup orchestration.
//!
//! # Responsibilities
//! - Compile the initial route table
//! - Initialize subsystems in dependency order
//! - Bind listeners, then start serving
//! - Start background tasks (health monitor, reload loop, signal listener)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and nothing is left running
//! - Every listener is bound before any task is spawned
//! - Both proxy listeners share one axum-server handle so they drain together

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum_server::Handle;
use futures_util::future::join_all;
use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{ConfigError, ConfigWatcher, ProxyConfig};
use crate::health::HealthMonitor;
use crate::http::HttpServer;
use crate::lifecycle::reload::Reloader;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::{self, ListenerError, TlsError};
use crate::observability::metrics;
use crate::routing::{RouteTable, RouteTableHandle};
use crate::upstream::UpstreamPool;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A started proxy. Dropping it does not stop anything; call `shutdown`.
pub struct RunningProxy {
    pub http_addr: SocketAddr,
    pub tls_addr: Option<SocketAddr>,
    pub admin_addr: Option<SocketAddr>,
    pub routes: Arc<RouteTableHandle>,
    pub pool: Arc<UpstreamPool>,
    pub reloader: Arc<Reloader>,
    shutdown: Shutdown,
    handle: Handle,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
    grace: Duration,
}

/// Start the proxy. `config_path` is the file reloads re-read; without it
/// only the initial configuration is ever served.
pub async fn start(config: ProxyConfig, config_path: Option<PathBuf>) -> Result<RunningProxy, StartupError> {
    let started_at = Instant::now();

    // 1. Routes and targets
    let table = RouteTable::from_config(&config)?;
    let targets = table.targets();
    tracing::info!(
        servers = table.servers().len(),
        routes = table.route_count(),
        targets = targets.len(),
        "Route table compiled"
    );
    let routes = Arc::new(RouteTableHandle::new(table));
    let pool = Arc::new(UpstreamPool::from_config(&config));
    pool.register(&targets);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }
    metrics::set_generation(routes.generation());

    // 2. Listeners
    let (http_listener, http_addr) = net::bind(&config.listener.bind_address)?;
    let tls = match &config.listener.tls {
        Some(tls) => {
            let rustls = net::load_tls_config(tls).await?;
            let (listener, addr) = net::bind(&tls.bind_address)?;
            Some((listener, addr, rustls))
        }
        None => None,
    };
    let admin = if config.admin.enabled {
        let (listener, addr) = net::bind(&config.admin.bind_address)?;
        Some((tokio::net::TcpListener::from_std(listener)?, addr))
    } else {
        None
    };

    // 3. Serving
    let shutdown = Shutdown::new();
    let handle = Handle::new();
    let server = Arc::new(HttpServer::new(&config, routes.clone(), pool.clone(), handle.clone()));
    let mut tasks = Vec::new();

    let plain = server.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = plain.serve_plain(http_listener).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    }));

    let tls_addr = match tls {
        Some((listener, addr, rustls)) => {
            let secure = server.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = secure.serve_tls(listener, rustls).await {
                    tracing::error!(error = %e, "HTTPS server failed");
                }
            }));
            Some(addr)
        }
        None => None,
    };

    // 4. Background tasks
    let monitor = HealthMonitor::new(pool.clone(), config.health_check.clone());
    tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));

    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    let reloader = Arc::new(Reloader::new(config_path.clone(), routes.clone(), pool.clone()));
    tasks.push(tokio::spawn(reloader.clone().run(reload_rx, shutdown.subscribe())));
    tasks.push(tokio::spawn(signals::forward_reload_signals(
        reload_tx.clone(),
        shutdown.subscribe(),
    )));

    let watcher = match &config_path {
        Some(path) => match ConfigWatcher::new(path, reload_tx).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Config watcher unavailable, reload via SIGHUP or admin API");
                None
            }
        },
        None => None,
    };

    let admin_addr = match admin {
        Some((listener, addr)) => {
            let state = AdminState {
                routes: routes.clone(),
                pool: pool.clone(),
                reloader: reloader.clone(),
                api_key: Arc::from(config.admin.api_key.as_str()),
                started_at,
            };
            let mut stop = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                tracing::info!(address = %addr, "Admin API listening");
                let serve = axum::serve(listener, setup_admin_router(state)).with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                });
                if let Err(e) = serve.await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            }));
            Some(addr)
        }
        None => None,
    };

    tracing::info!(
        http = %http_addr,
        https = ?tls_addr,
        admin = ?admin_addr,
        generation = routes.generation(),
        "Proxy started"
    );

    Ok(RunningProxy {
        http_addr,
        tls_addr,
        admin_addr,
        routes,
        pool,
        reloader,
        shutdown,
        handle,
        tasks,
        _watcher: watcher,
        grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
    })
}

impl RunningProxy {
    /// Serve until SIGINT/SIGTERM, then shut down gracefully.
    pub async fn wait(self) {
        signals::shutdown_signal().await;
        self.shutdown().await;
    }

    /// Stop accepting, let in-flight requests finish within the grace period,
    /// then stop background tasks.
    pub async fn shutdown(self) {
        tracing::info!(grace_secs = self.grace.as_secs(), "Shutting down");
        self.handle.graceful_shutdown(Some(self.grace));
        self.shutdown.trigger();

        let deadline = self.grace + Duration::from_secs(1);
        if tokio::time::timeout(deadline, join_all(self.tasks)).await.is_err() {
            tracing::warn!("Tasks still running after grace period, exiting anyway");
        }
        tracing::info!(connections = self.handle.connection_count(), "Shutdown complete");
    }
}
