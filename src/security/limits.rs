//! Request body limits.
//!
//! # Responsibilities
//! - Reject declared bodies over the limit from `Content-Length` alone
//! - Buffer bodies of unknown length up to the limit, no further
//!
//! # Design Decisions
//! - Limits are checked before any upstream connection is opened
//! - A body of exactly the limit is accepted

use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("invalid Content-Length header")]
    InvalidLength,

    #[error("failed to read request body: {0}")]
    Read(String),
}

/// Parsed `Content-Length`, if present.
pub fn content_length(headers: &HeaderMap) -> Result<Option<u64>, LimitError> {
    match headers.get(header::CONTENT_LENGTH) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or(LimitError::InvalidLength),
    }
}

/// Fail when the declared length is over `limit`.
pub fn check_declared(headers: &HeaderMap, limit: u64) -> Result<Option<u64>, LimitError> {
    match content_length(headers)? {
        Some(len) if len > limit => Err(LimitError::TooLarge { limit }),
        declared => Ok(declared),
    }
}

/// Read a body of unknown length, failing one byte past `limit`.
pub async fn buffer_within(body: Body, limit: u64) -> Result<Bytes, LimitError> {
    let limit_usize = usize::try_from(limit).unwrap_or(usize::MAX);
    match Limited::new(body, limit_usize).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(LimitError::TooLarge { limit }),
        Err(e) => Err(LimitError::Read(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_length(len: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static(len));
        headers
    }

    #[test]
    fn test_declared_length_boundary() {
        assert_eq!(check_declared(&with_length("10"), 10).unwrap(), Some(10));
        assert!(matches!(
            check_declared(&with_length("11"), 10),
            Err(LimitError::TooLarge { limit: 10 })
        ));
        assert_eq!(check_declared(&HeaderMap::new(), 10).unwrap(), None);
        assert!(matches!(
            check_declared(&with_length("ten"), 10),
            Err(LimitError::InvalidLength)
        ));
    }

    #[tokio::test]
    async fn test_buffer_within_boundary() {
        let exact = buffer_within(Body::from(vec![b'a'; 10]), 10).await.unwrap();
        assert_eq!(exact.len(), 10);

        let over = buffer_within(Body::from(vec![b'a'; 11]), 10).await;
        assert!(matches!(over, Err(LimitError::TooLarge { limit: 10 })));
    }
}
