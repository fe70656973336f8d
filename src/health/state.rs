//! Target health state machine.
//!
//! # States
//! - Healthy: target receives traffic
//! - Degraded: target excluded from routing
//!
//! # State Transitions
//! ```text
//! Healthy → Degraded: unhealthy_threshold consecutive failures, all inside
//!                     the sliding failure window
//! Degraded → Healthy: one successful probe
//! ```
//!
//! # Design Decisions
//! - State is an atomic so the request path never takes the failure lock
//! - Any success clears the failure streak
//! - With health checks disabled failures are counted but never degrade

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::HealthCheckConfig;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy = 0,
    Degraded = 1,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Degraded,
            _ => HealthState::Healthy,
        }
    }
}

/// Thresholds shared by every target.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub enabled: bool,
    pub threshold: u32,
    pub window: Duration,
}

impl From<&HealthCheckConfig> for HealthPolicy {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            enabled: config.enabled,
            threshold: config.unhealthy_threshold,
            window: Duration::from_secs(config.failure_window_secs),
        }
    }
}

#[derive(Debug)]
pub struct TargetHealth {
    state: AtomicU8,
    /// Timestamps of the current failure streak, oldest first.
    failures: Mutex<VecDeque<Instant>>,
    policy: HealthPolicy,
}

impl TargetHealth {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            state: AtomicU8::new(HealthState::Healthy as u8),
            failures: Mutex::new(VecDeque::new()),
            policy,
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_degraded(&self) -> bool {
        self.state() == HealthState::Degraded
    }

    pub fn consecutive_failures(&self) -> usize {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Report a success. Returns true if this restored a degraded target.
    pub fn mark_success(&self) -> bool {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.state
            .compare_exchange(
                HealthState::Degraded as u8,
                HealthState::Healthy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Report a failure. Returns true if this degraded the target.
    pub fn mark_failure(&self) -> bool {
        self.mark_failure_at(Instant::now())
    }

    fn mark_failure_at(&self, now: Instant) -> bool {
        let streak = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            while let Some(&oldest) = failures.front() {
                if now.saturating_duration_since(oldest) > self.policy.window {
                    failures.pop_front();
                } else {
                    break;
                }
            }
            failures.push_back(now);
            failures.len()
        };

        if !self.policy.enabled || streak < self.policy.threshold as usize {
            return false;
        }
        self.state
            .compare_exchange(
                HealthState::Healthy as u8,
                HealthState::Degraded as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
