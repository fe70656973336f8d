//! Header manipulation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Append X-Forwarded-For, set X-Real-IP, X-Forwarded-Proto, X-Forwarded-Host
//! - Rewrite Host and apply per-route extra headers
//! - Add per-server response headers (e.g. CORS)
//!
//! # Design Decisions
//! - Pure functions over `HeaderMap`: same input, same output
//! - X-Forwarded-For is appended to, never replaced, so the client chain
//!   survives multiple proxy hops

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// What the proxy knows about the inbound request.
#[derive(Debug, Clone, Copy)]
pub struct Forwarding<'a> {
    pub client_ip: IpAddr,
    pub scheme: &'a str,
    /// Host as the client sent it (port included), if it sent one.
    pub original_host: Option<&'a HeaderValue>,
    /// `Host` used when neither the client nor the route supplies one.
    pub target_authority: &'a HeaderValue,
    pub host_override: Option<&'a HeaderValue>,
    pub set_headers: &'a [(HeaderName, HeaderValue)],
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove(header::TRANSFER_ENCODING);
}

/// Build the header map sent upstream.
pub fn forward_request_headers(inbound: &HeaderMap, fwd: &Forwarding<'_>) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);

    let client = fwd.client_ip.to_string();
    let chain = inbound
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .chain(std::iter::once(client.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    set(&mut headers, X_FORWARDED_FOR.clone(), &chain);
    set(&mut headers, X_REAL_IP.clone(), &client);
    set(&mut headers, X_FORWARDED_PROTO.clone(), fwd.scheme);
    match fwd.original_host {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST.clone(), host.clone());
        }
        None => {
            headers.remove(&X_FORWARDED_HOST);
        }
    }
    let host = fwd
        .host_override
        .or(fwd.original_host)
        .unwrap_or(fwd.target_authority);
    headers.insert(header::HOST, host.clone());

    for (name, value) in fwd.set_headers {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

/// Add per-server response headers without clobbering ones the target set.
pub fn apply_response_headers(headers: &mut HeaderMap, extra: &[(HeaderName, HeaderValue)]) {
    for (name, value) in extra {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            headers.remove(name);
        }
    }
}
