//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → routing::RouteTable::compile (patterns, targets, ambiguity)
//!     → installed as the current snapshot
//!
//! On reload (file change, SIGHUP, admin API):
//!     watcher.rs / signals / admin emit a ReloadTrigger
//!     → file re-read and recompiled
//!     → atomic swap of Arc<RouteTable>, or rejection keeping the old one
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ByteSize, HealthCheckConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ProxyConfig, RouteConfig, ServerConfig, TimeoutConfig, TlsConfig, UpstreamConfig,
};
pub use validation::ValidationError;
pub use watcher::{ConfigWatcher, ReloadTrigger};
