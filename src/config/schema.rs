//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind addresses, TLS, global limits).
    pub listener: ListenerConfig,

    /// Upstream timeouts and the per-request deadline.
    pub timeouts: TimeoutConfig,

    /// Passive/active health settings for targets.
    pub health_check: HealthCheckConfig,

    /// Upstream connection pool settings.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Server blocks, one per routable domain group.
    pub servers: Vec<ServerConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plain HTTP bind address (e.g., "0.0.0.0:80").
    pub bind_address: String,

    /// Optional TLS listener.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,

    /// Global request body cap, enforced before routing.
    pub max_body_size: ByteSize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
            tls: None,
            max_connections: 10_000,
            max_body_size: ByteSize::mib(64),
        }
    }
}

/// TLS listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// TLS bind address.
    #[serde(default = "default_tls_bind")]
    pub bind_address: String,

    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

fn default_tls_bind() -> String {
    "0.0.0.0:443".to_string()
}

/// A server block: the hosts it answers for and its path rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Block identifier for logging/metrics.
    pub name: String,

    /// Host patterns: `example.com`, `*.example.com`, `.example.com`, `~regex`.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Receives requests whose host matches no other block.
    #[serde(default)]
    pub default: bool,

    /// Redirect plain HTTP requests to https.
    #[serde(default)]
    pub require_tls: bool,

    /// Body limit for every route in the block, unless a route overrides it.
    #[serde(default)]
    pub max_body_size: Option<ByteSize>,

    /// Extra headers added to every response of the block (e.g. CORS).
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,

    /// Path rules.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// A path rule inside a server block.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteConfig {
    /// Path pattern: `/prefix`, `/prefix/*`, `= /exact`, `~ regex`, `~* regex`.
    pub path: String,

    /// Upstream target: `unix:/run/app.sock`, `http://unix:/run/app.sock`,
    /// `127.0.0.1:4001` or `http://127.0.0.1:4001`.
    pub proxy: Option<String>,

    /// Redirect template, e.g. `https://example.com$request_uri`.
    pub redirect: Option<String>,

    /// Status used for redirects (301 when unset).
    pub redirect_status: Option<u16>,

    /// Explicit precedence, higher wins before specificity is considered.
    pub priority: i32,

    /// Used instead of `proxy` while the primary target is degraded.
    pub backup: Option<String>,

    /// Host header sent upstream instead of the client's.
    pub host_override: Option<String>,

    /// Request headers set on the upstream request.
    pub set_headers: BTreeMap<String, String>,

    /// Body limit override.
    pub max_body_size: Option<ByteSize>,

    /// Timeout overrides (seconds).
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Wait for upstream response bytes, in seconds.
    pub read_secs: u64,

    /// Delivery of the request to the upstream, in seconds.
    pub write_secs: u64,

    /// Whole-request deadline from acceptance, in seconds.
    pub request_secs: u64,

    /// Drain period on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            read_secs: 60,
            write_secs: 60,
            request_secs: 120,
            shutdown_grace_secs: 10,
        }
    }
}

/// Health configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable passive degradation and active probing.
    pub enabled: bool,

    /// Probe interval for degraded targets, in seconds.
    pub interval_secs: u64,

    /// Probe connect timeout in seconds.
    pub timeout_secs: u64,

    /// Consecutive failures before a target is degraded.
    pub unhealthy_threshold: u32,

    /// Window the consecutive failures must fall in, in seconds.
    pub failure_window_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_secs: 2,
            unhealthy_threshold: 3,
            failure_window_secs: 10,
        }
    }
}

/// Upstream connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Idle connections kept per target.
    pub max_idle_per_target: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            max_idle_per_target: 8,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human readable or JSON lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A byte count written as an integer or with a k/m/g suffix ("20m").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn kib(n: u64) -> Self {
        Self(n * 1024)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * 1024 * 1024)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse `"512"`, `"64k"`, `"20M"`, `"1g"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (digits, multiplier) = match raw.chars().last()?.to_ascii_lowercase() {
            'k' => (&raw[..raw.len() - 1], 1024),
            'm' => (&raw[..raw.len() - 1], 1024 * 1024),
            'g' => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
            _ => (raw, 1),
        };
        digits
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(multiplier))
            .map(Self)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(ByteSize(n)),
            Raw::Text(s) => ByteSize::parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid byte size: {s:?}"))),
        }
    }
}
