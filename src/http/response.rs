//! Locally generated responses (errors and redirects).

use axum::body::Body;
use axum::http::header::{self, HeaderValue, InvalidHeaderValue};
use axum::http::{Response, StatusCode};

/// Plain-text response with the status' canonical reason as body.
pub fn status_page(status: StatusCode) -> Response<Body> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(Body::from(format!("{} {}\n", status.as_u16(), reason)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Empty-bodied redirect to `location`.
pub fn redirect(status: StatusCode, location: &str) -> Result<Response<Body>, InvalidHeaderValue> {
    let location = HeaderValue::from_str(location)?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_page() {
        let response = status_page(StatusCode::BAD_GATEWAY);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    fn test_redirect() {
        let response = redirect(StatusCode::FOUND, "https://b.example.com/x").unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "https://b.example.com/x");
        assert!(redirect(StatusCode::FOUND, "https://b\n").is_err());
    }
}
