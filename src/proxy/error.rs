//! Per-request failure taxonomy and its HTTP mapping.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response;
use crate::security::limits::LimitError;
use crate::upstream::UpstreamError;

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// The global per-request deadline.
    Request,
    /// Waiting for the upstream response head (write + read timeouts).
    UpstreamResponse,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutStage::Request => "request",
            TimeoutStage::UpstreamResponse => "upstream response",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no route for host {host:?}")]
    NoRouteMatched { host: String },

    #[error("request has no host")]
    MissingHost,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] UpstreamError),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{stage} timed out")]
    Timeout { stage: TimeoutStage },

    #[error("redirect location {0:?} is not a valid header value")]
    InvalidRedirect(String),
}

impl ProxyError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoRouteMatched { .. } => "no_route",
            ProxyError::MissingHost | ProxyError::BadRequest(_) => "bad_request",
            ProxyError::UpstreamUnavailable(_) => "upstream_unavailable",
            ProxyError::BodyTooLarge { .. } => "body_too_large",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::InvalidRedirect(_) => "invalid_redirect",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
            ProxyError::MissingHost | ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidRedirect(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LimitError> for ProxyError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::TooLarge { limit } => ProxyError::BodyTooLarge { limit },
            other => ProxyError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        response::status_page(self.status())
    }
}
