//! Request hygiene subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (declared length, then bounded buffering)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Forward upstream
//!
//! Upstream response:
//!     → headers.rs (strip hop-by-hop, add server response headers)
//! ```
//!
//! # Design Decisions
//! - Fail closed: oversize bodies never reach a target
//! - Existing X-Forwarded-For entries are kept and appended to

pub mod headers;
pub mod limits;
