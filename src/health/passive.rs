//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe request outcomes against a target
//! - Feed them into the target's health state
//! - Log and publish state transitions
//!
//! # Design Decisions
//! - Only connect failures, I/O errors and upstream timeouts count
//! - HTTP status codes are NOT failures (the target answered)

use std::fmt::Display;

use crate::health::state::TargetHealth;
use crate::observability::metrics;
use crate::upstream::TargetAddr;

/// Record a failed exchange with `addr`.
pub fn record_failure(addr: &TargetAddr, health: &TargetHealth, reason: &dyn Display) {
    if health.mark_failure() {
        tracing::warn!(
            target_addr = %addr,
            failures = health.consecutive_failures(),
            reason = %reason,
            "Target degraded"
        );
        metrics::record_target_health(addr, false);
    } else {
        tracing::debug!(
            target_addr = %addr,
            failures = health.consecutive_failures(),
            reason = %reason,
            "Target failure recorded"
        );
    }
}

/// Record a successful exchange (or probe) with `addr`.
pub fn record_success(addr: &TargetAddr, health: &TargetHealth) {
    if health.mark_success() {
        tracing::info!(target_addr = %addr, "Target restored");
        metrics::record_target_health(addr, true);
    }
}
