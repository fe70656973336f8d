//! Proxy engine subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted   snapshot captured, global body cap checked (context.rs)
//!     → Matched     host → block → path rule against the snapshot
//!         → redirect / require_tls: 3xx, done
//!         → route body limit: 413 before any connect
//!     → Connecting  pool select + acquire (502 when unavailable)
//!     → Forwarding  headers rewritten, request sent, head awaited (504)
//!     → Completed   body streamed back (body.rs), connection released
//!
//! Failed is reachable from every phase (error.rs maps it to a response).
//! ```
//!
//! # Design Decisions
//! - Every per-request error stays inside the request's task
//! - The snapshot is held by the context, so a reload mid-request changes
//!   nothing for that request

pub mod body;
pub mod context;
pub mod engine;
pub mod error;

pub use context::{InboundScheme, Phase, RequestContext};
pub use engine::proxy_handler;
pub use error::{ProxyError, TimeoutStage};
