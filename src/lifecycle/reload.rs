//! Route table reloads.
//!
//! # Responsibilities
//! - Re-read and recompile the configuration file on request
//! - Swap the new table in, or keep the old one and report why
//! - Keep the upstream pool's target set in step with the table
//!
//! # Design Decisions
//! - File watcher, SIGHUP and the admin API all funnel into `Reloader::reload`
//! - Listener, timeout-default and health-policy changes need a restart; only
//!   server blocks and the targets they reference are reloaded
//! - In-flight requests keep the snapshot they captured
//! - One reload at a time: compile, install and pool pruning run under one
//!   lock, so the pool always follows the installed table

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};

use crate::config::{load_config, ConfigError, ReloadTrigger};
use crate::observability::metrics;
use crate::routing::{RouteTable, RouteTableHandle};
use crate::upstream::UpstreamPool;

pub struct Reloader {
    path: Option<PathBuf>,
    routes: Arc<RouteTableHandle>,
    pool: Arc<UpstreamPool>,
    in_progress: Mutex<()>,
}

impl Reloader {
    pub fn new(path: Option<PathBuf>, routes: Arc<RouteTableHandle>, pool: Arc<UpstreamPool>) -> Self {
        Self {
            path,
            routes,
            pool,
            in_progress: Mutex::new(()),
        }
    }

    /// Recompile the config file and install it; returns the new generation.
    ///
    /// Blocks while another reload is running.
    pub fn reload(&self, trigger: ReloadTrigger) -> Result<u64, ConfigError> {
        let _guard = self.in_progress.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.compile().map(|table| {
            let targets = table.targets();
            let routes = table.route_count();
            let generation = self.routes.install(table);
            self.pool.retain(&targets);
            (generation, routes, targets.len())
        });

        match result {
            Ok((generation, routes, targets)) => {
                metrics::record_reload(trigger, true);
                metrics::set_generation(generation);
                tracing::info!(
                    trigger = %trigger,
                    generation = generation,
                    routes = routes,
                    targets = targets,
                    "Route table reloaded"
                );
                Ok(generation)
            }
            Err(e) => {
                metrics::record_reload(trigger, false);
                tracing::error!(
                    trigger = %trigger,
                    generation = self.routes.generation(),
                    error = %e,
                    "Reload rejected, keeping current route table"
                );
                Err(e)
            }
        }
    }

    fn compile(&self) -> Result<RouteTable, ConfigError> {
        let path = self.path.as_deref().ok_or(ConfigError::NoSource)?;
        let config = load_config(path)?;
        RouteTable::from_config(&config)
    }

    /// Serve reload requests until shutdown or until every sender is gone.
    pub async fn run(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<ReloadTrigger>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                trigger = requests.recv() => {
                    let Some(trigger) = trigger else { break };
                    // editors emit bursts of events for one save
                    while let Ok(next) = requests.try_recv() {
                        tracing::trace!(trigger = %next, "Coalesced reload request");
                    }
                    let reloader = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || reloader.reload(trigger)).await {
                        tracing::error!(error = %e, "Reload task panicked");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Reload loop stopped");
    }
}
