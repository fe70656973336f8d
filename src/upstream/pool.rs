//! Per-target connection pool.
//!
//! # Responsibilities
//! - Keep a bounded free list of idle HTTP/1.1 connections per target
//! - Hand out exclusively owned connections with the target's connect timeout
//! - Track passive health and pick the backup when the primary is degraded
//!
//! # Design Decisions
//! - A connection goes back to the free list only through `release`, which
//!   the response body calls after a clean end of stream. Dropping a
//!   `PooledConnection` any other way discards it.
//! - Idle connections are re-checked for readiness before reuse
//! - No retries: a failed acquire is reported to the caller as is

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use serde::Serialize;
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::health::passive;
use crate::health::state::{HealthPolicy, HealthState, TargetHealth};
use crate::observability::metrics;
use crate::routing::ProxyAction;
use crate::upstream::connector;
use crate::upstream::{Target, TargetAddr};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("target {0} is degraded")]
    Degraded(TargetAddr),

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: TargetAddr, timeout: Duration },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: TargetAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with {addr} failed: {source}")]
    Handshake {
        addr: TargetAddr,
        #[source]
        source: hyper::Error,
    },

    #[error("request to {addr} failed: {source}")]
    Request {
        addr: TargetAddr,
        #[source]
        source: hyper::Error,
    },

    #[error("connection to {0} was already released")]
    Closed(TargetAddr),
}

impl UpstreamError {
    /// Whether the error says something about the target's health.
    pub fn counts_against_target(&self) -> bool {
        !matches!(self, UpstreamError::Degraded(_) | UpstreamError::Closed(_))
    }
}

/// Pool state for one target address.
#[derive(Debug)]
pub struct TargetSlot {
    addr: TargetAddr,
    idle: Mutex<Vec<SendRequest<Body>>>,
    health: TargetHealth,
    active: AtomicUsize,
}

impl TargetSlot {
    fn new(addr: TargetAddr, policy: HealthPolicy) -> Self {
        Self {
            addr,
            idle: Mutex::new(Vec::new()),
            health: TargetHealth::new(policy),
            active: AtomicUsize::new(0),
        }
    }

    pub fn addr(&self) -> &TargetAddr {
        &self.addr
    }

    pub fn health(&self) -> &TargetHealth {
        &self.health
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn pop_idle(&self) -> Option<SendRequest<Body>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn push_idle(&self, sender: SendRequest<Body>, max_idle: usize) {
        if sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < max_idle {
            idle.push(sender);
        }
    }
}

/// Serializable view of a target for the admin API.
#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub address: String,
    pub kind: &'static str,
    pub state: HealthState,
    pub consecutive_failures: usize,
    pub idle_connections: usize,
    pub active_connections: usize,
}

pub struct UpstreamPool {
    slots: DashMap<TargetAddr, Arc<TargetSlot>>,
    policy: HealthPolicy,
    max_idle: usize,
}

impl UpstreamPool {
    pub fn new(policy: HealthPolicy, max_idle: usize) -> Self {
        Self {
            slots: DashMap::new(),
            policy,
            max_idle,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            HealthPolicy::from(&config.health_check),
            config.upstream.max_idle_per_target,
        )
    }

    /// Make sure every address has a slot, so health and status cover
    /// targets that have not seen traffic yet.
    pub fn register(&self, addrs: &[TargetAddr]) {
        for addr in addrs {
            self.slot(addr);
        }
    }

    /// Forget targets that are no longer referenced by any route.
    pub fn retain(&self, addrs: &[TargetAddr]) {
        self.slots.retain(|addr, _| addrs.contains(addr));
        self.register(addrs);
    }

    pub fn slot(&self, addr: &TargetAddr) -> Arc<TargetSlot> {
        if let Some(slot) = self.slots.get(addr) {
            return slot.value().clone();
        }
        self.slots
            .entry(addr.clone())
            .or_insert_with(|| Arc::new(TargetSlot::new(addr.clone(), self.policy)))
            .value()
            .clone()
    }

    pub fn is_degraded(&self, addr: &TargetAddr) -> bool {
        self.slots
            .get(addr)
            .map(|slot| slot.health.is_degraded())
            .unwrap_or(false)
    }

    pub fn degraded(&self) -> Vec<Arc<TargetSlot>> {
        self.slots
            .iter()
            .filter(|slot| slot.health.is_degraded())
            .map(|slot| slot.value().clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<TargetStatus> {
        let mut statuses: Vec<TargetStatus> = self
            .slots
            .iter()
            .map(|slot| TargetStatus {
                address: slot.addr.to_string(),
                kind: slot.addr.kind(),
                state: slot.health.state(),
                consecutive_failures: slot.health.consecutive_failures(),
                idle_connections: slot.idle_count(),
                active_connections: slot.active_count(),
            })
            .collect();
        statuses.sort_by(|a, b| a.address.cmp(&b.address));
        statuses
    }

    /// Choose the primary target, or the backup when the primary is degraded.
    pub fn select<'a>(&self, action: &'a ProxyAction) -> Result<&'a Target, UpstreamError> {
        let primary = &action.target;
        if !self.is_degraded(&primary.addr) {
            return Ok(primary);
        }
        match &action.backup {
            Some(backup) if !self.is_degraded(&backup.addr) => {
                tracing::info!(
                    primary = %primary.addr,
                    backup = %backup.addr,
                    "Primary target degraded, using backup"
                );
                Ok(backup)
            }
            _ => Err(UpstreamError::Degraded(primary.addr.clone())),
        }
    }

    /// Get an exclusively owned connection to `target`.
    pub async fn acquire(&self, target: &Target) -> Result<PooledConnection, UpstreamError> {
        let slot = self.slot(&target.addr);
        if slot.health.is_degraded() {
            return Err(UpstreamError::Degraded(target.addr.clone()));
        }

        while let Some(mut sender) = slot.pop_idle() {
            if sender.ready().await.is_ok() {
                tracing::trace!(target_addr = %target.addr, "Reusing idle connection");
                return Ok(PooledConnection::new(slot, sender, self.max_idle));
            }
        }

        let result = match tokio::time::timeout(target.connect_timeout, connector::connect(&target.addr)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::ConnectTimeout {
                addr: target.addr.clone(),
                timeout: target.connect_timeout,
            }),
        };

        match result {
            Ok(sender) => {
                tracing::debug!(target_addr = %target.addr, "Opened upstream connection");
                Ok(PooledConnection::new(slot, sender, self.max_idle))
            }
            Err(e) => {
                metrics::record_upstream_connect_failure(&target.addr);
                passive::record_failure(&target.addr, &slot.health, &e);
                Err(e)
            }
        }
    }
}

/// A connection owned by one request.
#[derive(Debug)]
pub struct PooledConnection {
    slot: Arc<TargetSlot>,
    sender: Option<SendRequest<Body>>,
    max_idle: usize,
    reusable: bool,
}

impl PooledConnection {
    fn new(slot: Arc<TargetSlot>, sender: SendRequest<Body>, max_idle: usize) -> Self {
        slot.active.fetch_add(1, Ordering::Relaxed);
        Self {
            slot,
            sender: Some(sender),
            max_idle,
            reusable: false,
        }
    }

    pub fn addr(&self) -> &TargetAddr {
        &self.slot.addr
    }

    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, UpstreamError> {
        let addr = &self.slot.addr;
        let sender = self
            .sender
            .as_mut()
            .ok_or_else(|| UpstreamError::Closed(addr.clone()))?;
        let request_err = |source| UpstreamError::Request {
            addr: addr.clone(),
            source,
        };
        sender.ready().await.map_err(request_err)?;
        sender.send_request(request).await.map_err(request_err)
    }

    pub fn report_success(&self) {
        passive::record_success(&self.slot.addr, &self.slot.health);
    }

    pub fn report_failure(&self, reason: &dyn std::fmt::Display) {
        passive::record_failure(&self.slot.addr, &self.slot.health, reason);
    }

    /// Return the connection to the free list.
    pub fn release(mut self) {
        self.reusable = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            if self.reusable {
                self.slot.push_idle(sender, self.max_idle);
            }
        }
        self.slot.active.fetch_sub(1, Ordering::Relaxed);
    }
}
