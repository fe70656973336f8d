//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (startup and reload):
//!     ProxyConfig.servers[]
//!     → table.rs (parse patterns, resolve targets, reject duplicates)
//!     → host_index.rs (exact map + reversed-label trie + regex list)
//!     → snapshot.rs (install as a new generation)
//!
//! Incoming Request (host, path):
//!     → snapshot captured once
//!     → matcher.rs (host → server block, then best path rule)
//!     → Return: matched Route or NoMatch
//! ```
//!
//! # Design Decisions
//! - Routes compiled ahead of time, immutable at runtime
//! - Regexes compiled once per table, never per request
//! - Host decides the server block before any path rule is looked at
//! - Precedence is explicit: priority, then specificity, then declaration order
//! - Deterministic: same input always matches same route

pub mod host_index;
pub mod matcher;
pub mod redirect;
pub mod snapshot;
pub mod table;

pub use matcher::{match_route, normalize_host, normalize_path, HostPattern, PathPattern};
pub use redirect::{RedirectTemplate, RequestParts};
pub use snapshot::RouteTableHandle;
pub use table::{ProxyAction, Route, RouteAction, RouteTable, ServerBlock};
