//! Listener binding.
//!
//! # Responsibilities
//! - Bind the configured plain, TLS and admin addresses
//! - Report the bound address (port 0 resolves here)

use std::net::{SocketAddr, TcpListener};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listen address {addr:?}: {source}")]
    Address {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Bind a non-blocking std listener, ready to hand to the runtime.
pub fn bind(address: &str) -> Result<(TcpListener, SocketAddr), ListenerError> {
    let addr: SocketAddr = address.parse().map_err(|source| ListenerError::Address {
        addr: address.to_string(),
        source,
    })?;
    let bind_err = |source| ListenerError::Bind { addr, source };

    let listener = TcpListener::bind(addr).map_err(bind_err)?;
    listener.set_nonblocking(true).map_err(bind_err)?;
    let local_addr = listener.local_addr().map_err(bind_err)?;

    tracing::info!(address = %local_addr, "Listener bound");
    Ok((listener, local_addr))
}
