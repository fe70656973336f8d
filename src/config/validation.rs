//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check each route names exactly one action
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Pattern, target and template syntax is checked when the route table
//!   compiles, using the same error type

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ProxyConfig, RouteConfig, ServerConfig};

/// A single semantic problem, located by its config path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(tls) = &config.listener.tls {
        check_socket_addr(&mut errors, "listener.tls.bind_address", &tls.bind_address);
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.listener.max_body_size.as_u64() == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be greater than 0"));
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.read_secs", config.timeouts.read_secs),
        ("timeouts.write_secs", config.timeouts.write_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.health_check.enabled {
        if config.health_check.unhealthy_threshold == 0 {
            errors.push(ValidationError::new("health_check.unhealthy_threshold", "must be greater than 0"));
        }
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be greater than 0"));
        }
        if config.health_check.failure_window_secs == 0 {
            errors.push(ValidationError::new("health_check.failure_window_secs", "must be greater than 0"));
        }
    }

    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must be set when the admin API is enabled"));
        }
    }

    if config.observability.metrics_enabled {
        check_socket_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    let mut names = HashSet::new();
    let mut default_blocks = 0;
    for (i, server) in config.servers.iter().enumerate() {
        let field = format!("servers[{i}]");
        if !names.insert(server.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate server name {:?}", server.name),
            ));
        }
        if server.default {
            default_blocks += 1;
        }
        validate_server(&mut errors, &field, server);
    }
    if default_blocks > 1 {
        errors.push(ValidationError::new("servers", "more than one block is marked default"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(errors: &mut Vec<ValidationError>, field: &str, server: &ServerConfig) {
    if server.name.is_empty() {
        errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
    }
    if server.hosts.is_empty() && !server.default {
        errors.push(ValidationError::new(
            format!("{field}.hosts"),
            "must list at least one host unless the block is the default",
        ));
    }
    if server.hosts.iter().any(|h| h.trim().is_empty()) {
        errors.push(ValidationError::new(format!("{field}.hosts"), "contains an empty host pattern"));
    }
    if server.max_body_size.is_some_and(|s| s.as_u64() == 0) {
        errors.push(ValidationError::new(format!("{field}.max_body_size"), "must be greater than 0"));
    }
    for (j, route) in server.routes.iter().enumerate() {
        validate_route(errors, &format!("{field}.routes[{j}]"), route);
    }
}

fn validate_route(errors: &mut Vec<ValidationError>, field: &str, route: &RouteConfig) {
    if route.path.trim().is_empty() {
        errors.push(ValidationError::new(format!("{field}.path"), "must not be empty"));
    }

    match (&route.proxy, &route.redirect) {
        (Some(_), Some(_)) => errors.push(ValidationError::new(
            field,
            "sets both `proxy` and `redirect`; choose one",
        )),
        (None, None) => errors.push(ValidationError::new(field, "needs either `proxy` or `redirect`")),
        (Some(_), None) => {
            if route.redirect_status.is_some() {
                errors.push(ValidationError::new(
                    format!("{field}.redirect_status"),
                    "only applies to redirect rules",
                ));
            }
        }
        (None, Some(_)) => {
            let proxy_only = [
                ("backup", route.backup.is_some()),
                ("host_override", route.host_override.is_some()),
                ("set_headers", !route.set_headers.is_empty()),
            ];
            for (name, set) in proxy_only {
                if set {
                    errors.push(ValidationError::new(
                        format!("{field}.{name}"),
                        "only applies to proxy rules",
                    ));
                }
            }
        }
    }

    if let Some(status) = route.redirect_status {
        if !REDIRECT_STATUSES.contains(&status) {
            errors.push(ValidationError::new(
                format!("{field}.redirect_status"),
                format!("{status} is not a redirect status"),
            ));
        }
    }

    let overrides = [
        ("connect_timeout_secs", route.connect_timeout_secs),
        ("read_timeout_secs", route.read_timeout_secs),
        ("write_timeout_secs", route.write_timeout_secs),
    ];
    for (name, value) in overrides {
        if value == Some(0) {
            errors.push(ValidationError::new(format!("{field}.{name}"), "must be greater than 0"));
        }
    }
    if route.max_body_size.is_some_and(|s| s.as_u64() == 0) {
        errors.push(ValidationError::new(format!("{field}.max_body_size"), "must be greater than 0"));
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("{value:?} is not a socket address")));
    }
}
