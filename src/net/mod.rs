//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address
//!     → listener.rs (parse, bind, non-blocking std listener)
//!     → tls.rs (optional rustls acceptor, handshake failures logged)
//!     → Hand off to axum-server and the HTTP layer
//! ```
//!
//! # Design Decisions
//! - Listeners are bound before any task is spawned so bind errors are fatal
//!   at startup
//! - TLS is optional and terminated here; requests never see the handshake

pub mod listener;
pub mod tls;

pub use listener::{bind, ListenerError};
pub use tls::{load_tls_config, validate_pem, HandshakeLogger, TlsError};
