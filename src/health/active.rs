//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe degraded targets
//! - Restore a target once a probe connects

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::passive;
use crate::upstream::connector;
use crate::upstream::UpstreamPool;

pub struct HealthMonitor {
    pool: Arc<UpstreamPool>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(pool: Arc<UpstreamPool>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            threshold = self.config.unhealthy_threshold,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_degraded().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every degraded target once.
    pub async fn probe_degraded(&self) {
        let timeout = Duration::from_secs(self.config.timeout_secs);

        for slot in self.pool.degraded() {
            let addr = slot.addr();
            match time::timeout(timeout, connector::probe(addr)).await {
                Ok(Ok(())) => passive::record_success(addr, slot.health()),
                Ok(Err(e)) => {
                    tracing::debug!(target_addr = %addr, error = %e, "Probe failed: connection error");
                }
                Err(_) => {
                    tracing::debug!(target_addr = %addr, "Probe failed: timeout");
                }
            }
        }
    }
}
