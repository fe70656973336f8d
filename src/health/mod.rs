//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive health checks (passive.rs):
//!     Connect failure / upstream I/O error / upstream timeout observed
//!     → Append to the target's failure streak
//!     → Degrade in state.rs once the threshold is reached inside the window
//!
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each degraded target (plain connect)
//!     → Restore it in state.rs on success
//!
//! State machine (state.rs):
//!     Healthy ←→ Degraded
//! ```
//!
//! # Design Decisions
//! - Traffic never flows to a degraded target; only probes do
//! - Health state is per target address, shared by every route using it
//! - No probes while nothing is degraded

pub mod active;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthPolicy, HealthState, TargetHealth};
