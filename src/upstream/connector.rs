//! Opens transport connections to targets and performs the HTTP/1.1 handshake.

use std::io;

use axum::body::Body;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use crate::upstream::pool::UpstreamError;
use crate::upstream::TargetAddr;

/// Connect and hand back a request sender; the connection driver runs on
/// its own task until the sender is dropped.
pub(crate) async fn connect(addr: &TargetAddr) -> Result<SendRequest<Body>, UpstreamError> {
    let connect_err = |source: io::Error| UpstreamError::Connect {
        addr: addr.clone(),
        source,
    };
    match addr {
        TargetAddr::Unix(path) => {
            let stream = UnixStream::connect(path).await.map_err(connect_err)?;
            handshake(stream, addr).await
        }
        TargetAddr::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(connect_err)?;
            let _ = stream.set_nodelay(true);
            handshake(stream, addr).await
        }
    }
}

/// Open and immediately close a transport connection.
pub(crate) async fn probe(addr: &TargetAddr) -> io::Result<()> {
    match addr {
        TargetAddr::Unix(path) => UnixStream::connect(path).await.map(drop),
        TargetAddr::Tcp { host, port } => TcpStream::connect((host.as_str(), *port)).await.map(drop),
    }
}

async fn handshake<S>(stream: S, addr: &TargetAddr) -> Result<SendRequest<Body>, UpstreamError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|source| UpstreamError::Handshake {
            addr: addr.clone(),
            source,
        })?;

    let target = addr.to_string();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(target_addr = %target, error = %e, "Upstream connection closed with error");
        }
    });
    Ok(sender)
}
