//! Upstream target addressing.
//!
//! # Responsibilities
//! - Parse target strings (`unix:/run/app.sock`, `127.0.0.1:4001`, with or
//!   without an `http://` scheme)
//! - Carry the per-target limits a request inherits from its route

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use url::Url;

/// Where a target listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// Filesystem-addressed unix domain socket.
    Unix(PathBuf),
    /// TCP `host:port`.
    Tcp { host: String, port: u16 },
}

impl TargetAddr {
    pub fn kind(&self) -> &'static str {
        match self {
            TargetAddr::Unix(_) => "unix",
            TargetAddr::Tcp { .. } => "tcp",
        }
    }

    /// `Host` value for requests that arrived without one.
    pub fn authority(&self) -> HeaderValue {
        match self {
            TargetAddr::Unix(_) => HeaderValue::from_static("localhost"),
            TargetAddr::Tcp { .. } => {
                HeaderValue::from_str(&self.to_string()).unwrap_or_else(|_| HeaderValue::from_static("localhost"))
            }
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Unix(path) => write!(f, "unix:{}", path.display()),
            TargetAddr::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            TargetAddr::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

impl FromStr for TargetAddr {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let rest = raw.strip_prefix("http://").unwrap_or(raw);

        if let Some(path) = rest.strip_prefix("unix:") {
            // nginx spells socket upstreams `http://unix:/path:`
            let path = path.strip_suffix(':').unwrap_or(path);
            if path.is_empty() {
                return Err("unix socket path is empty".to_string());
            }
            if !path.starts_with('/') {
                return Err(format!("unix socket path {path:?} must be absolute"));
            }
            return Ok(TargetAddr::Unix(PathBuf::from(path)));
        }

        if rest.contains("://") {
            return Err(format!("unsupported target scheme in {raw:?}"));
        }

        let url = Url::parse(&format!("http://{rest}"))
            .map_err(|e| format!("invalid target {raw:?}: {e}"))?;
        if url.path() != "/" || url.query().is_some() || !url.username().is_empty() {
            return Err(format!("target {raw:?} must be a bare host:port"));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("target {raw:?} has no host"))?;
        // Url drops the default port, so require it to be spelled out.
        let port = match url.port() {
            Some(port) => port,
            None if rest.ends_with(":80") => 80,
            None => return Err(format!("target {raw:?} must include a port")),
        };

        Ok(TargetAddr::Tcp {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

/// A compiled upstream target. Owned by the route table, shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub addr: TargetAddr,
    pub max_body_size: u64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}
