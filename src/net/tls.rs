//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Validate PEM certificate and key material up front
//! - Build the rustls server config for the TLS listener
//! - Log and count failed handshakes; the connection is dropped without a
//!   response

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::config::TlsConfig;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Config(#[source] io::Error),
}

/// Check that the cert file holds at least one certificate and the key file a
/// private key.
pub fn validate_pem(cert_path: &Path, key_path: &Path) -> Result<(), TlsError> {
    let open = |path: &Path| {
        File::open(path).map(BufReader::new).map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
    };

    let mut certs = open(cert_path)?;
    let count = rustls_pemfile::certs(&mut certs)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?
        .len();
    if count == 0 {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut key = open(key_path)?;
    match rustls_pemfile::private_key(&mut key) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(TlsError::NoPrivateKey(key_path.to_path_buf())),
        Err(source) => Err(TlsError::Read {
            path: key_path.to_path_buf(),
            source,
        }),
    }
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(tls: &TlsConfig) -> Result<RustlsConfig, TlsError> {
    let cert_path = Path::new(&tls.cert_path);
    let key_path = Path::new(&tls.key_path);
    validate_pem(cert_path, key_path)?;

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(TlsError::Config)?;
    tracing::info!(cert = %tls.cert_path, "TLS certificate loaded");
    Ok(config)
}

/// Wraps the rustls acceptor to make handshake failures visible.
#[derive(Clone)]
pub struct HandshakeLogger {
    inner: RustlsAcceptor,
}

impl HandshakeLogger {
    pub fn new(config: RustlsConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for HandshakeLogger
where
    RustlsAcceptor: Accept<I, S>,
    <RustlsAcceptor as Accept<I, S>>::Future: Send + 'static,
{
    type Stream = <RustlsAcceptor as Accept<I, S>>::Stream;
    type Service = <RustlsAcceptor as Accept<I, S>>::Service;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let handshake = self.inner.accept(stream, service);
        Box::pin(async move {
            match handshake.await {
                Ok(accepted) => Ok(accepted),
                Err(e) => {
                    tracing::debug!(error = %e, kind = "tls_handshake", "TLS handshake failed");
                    metrics::record_tls_handshake_failure();
                    Err(e)
                }
            }
        })
    }
}
