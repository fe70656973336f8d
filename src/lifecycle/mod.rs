//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Compile routes → Register targets → Bind listeners → Serve
//!
//! Reload (reload.rs):
//!     File change / SIGHUP / admin → Recompile → Swap or keep
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain requests → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger route table reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: forced exit after deadline

pub mod reload;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use reload::Reloader;
pub use shutdown::Shutdown;
pub use startup::{start, RunningProxy, StartupError};
