//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! Matched proxy route (ProxyAction)
//!     → pool.rs select (primary, or backup when the primary is degraded)
//!     → pool.rs acquire (idle connection, or connector.rs connect + handshake)
//!     → PooledConnection owned by the request
//!     → released to the free list on clean end of stream, dropped otherwise
//! ```
//!
//! # Design Decisions
//! - Targets are unix sockets or TCP host:port, behind one `TargetAddr` type
//! - HTTP/1.1 towards targets, whatever the client spoke
//! - Connections are never shared by concurrent requests

pub mod connector;
pub mod pool;
pub mod target;

pub use pool::{PooledConnection, TargetStatus, UpstreamError, UpstreamPool};
pub use target::{Target, TargetAddr};
