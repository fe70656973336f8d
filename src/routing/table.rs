//! Compiled route table.
//!
//! # Responsibilities
//! - Compile server blocks and path rules from configuration
//! - Resolve targets, limits and timeouts per route
//! - Reject ambiguous duplicates
//! - Look up the matching route for a request
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Every block ends with a catch-all `/` rule; one is synthesised when the
//!   configuration does not declare it
//! - Explicit NoMatch (`None`) only when no block accepts the host

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

use crate::config::{parse_config, ConfigError, ProxyConfig, RouteConfig, ServerConfig, ValidationError};
use crate::routing::host_index::HostIndex;
use crate::routing::matcher::{match_route, precedence_key, HostPattern, PathPattern};
use crate::routing::redirect::RedirectTemplate;
use crate::upstream::{Target, TargetAddr};

pub type HeaderList = Arc<[(HeaderName, HeaderValue)]>;

/// Forwarding settings of a proxy rule.
#[derive(Debug, Clone)]
pub struct ProxyAction {
    pub target: Target,
    pub backup: Option<Target>,
    pub host_override: Option<HeaderValue>,
    pub set_headers: Vec<(HeaderName, HeaderValue)>,
}

/// What a matched route does.
#[derive(Debug, Clone)]
pub enum RouteAction {
    Proxy(ProxyAction),
    Redirect {
        template: RedirectTemplate,
        status: StatusCode,
    },
    /// Synthesised catch-all of a block without a `/` rule.
    NotFound,
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Route {
    /// Name of the owning server block.
    pub server: Arc<str>,
    /// Declaration index inside the block.
    pub index: usize,
    pub path: PathPattern,
    pub priority: i32,
    pub action: RouteAction,
    pub require_tls: bool,
    pub response_headers: HeaderList,
}

impl Route {
    /// Stable identifier for logs and metrics, e.g. `api#2`.
    pub fn id(&self) -> RouteId<'_> {
        RouteId(self)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.action, RouteAction::Redirect { .. })
    }
}

pub struct RouteId<'a>(&'a Route);

impl fmt::Display for RouteId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.server, self.0.index)
    }
}

/// A group of routes sharing host patterns.
#[derive(Debug)]
pub struct ServerBlock {
    pub name: Arc<str>,
    pub hosts: Vec<HostPattern>,
    pub is_default: bool,
    /// Sorted by precedence; the last entry is the catch-all.
    pub routes: Vec<Arc<Route>>,
}

/// The immutable, compiled set of server blocks.
#[derive(Debug, Default)]
pub struct RouteTable {
    servers: Vec<ServerBlock>,
    hosts: HostIndex,
    generation: u64,
}

impl RouteTable {
    /// Parse, validate and compile configuration text.
    pub fn compile(text: &str) -> Result<Self, ConfigError> {
        let config = parse_config(text)?;
        Self::from_config(&config)
    }

    /// Compile an already validated configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        let mut servers = Vec::with_capacity(config.servers.len());
        let mut hosts = HostIndex::default();

        for (i, server) in config.servers.iter().enumerate() {
            let field = format!("servers[{i}]");
            if let Some(block) = compile_server(config, server, &field, &mut errors) {
                servers.push(block);
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        for (idx, block) in servers.iter().enumerate() {
            for pattern in &block.hosts {
                if let Err(other) = hosts.insert(pattern, idx) {
                    return Err(ConfigError::Ambiguous(format!(
                        "host {pattern} is claimed by servers {:?} and {:?}",
                        servers[other].name, block.name
                    )));
                }
            }
            if block.is_default {
                hosts.set_default(idx);
            }
            check_duplicate_paths(block)?;
        }

        Ok(Self {
            servers,
            hosts,
            generation: 0,
        })
    }

    /// Stamp the generation this table is installed as.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Find the route for a request; `None` means no block accepts the host.
    pub fn lookup(&self, host: &str, path: &str) -> Option<Arc<Route>> {
        match_route(self, host, path).cloned()
    }

    pub(crate) fn server_for_host(&self, normalized_host: &str) -> Option<&ServerBlock> {
        self.hosts
            .lookup(normalized_host)
            .and_then(|idx| self.servers.get(idx))
    }

    pub fn servers(&self) -> &[ServerBlock] {
        &self.servers
    }

    pub fn route_count(&self) -> usize {
        self.servers.iter().map(|s| s.routes.len()).sum()
    }

    /// Every distinct target address the table can forward to.
    pub fn targets(&self) -> Vec<TargetAddr> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for route in self.servers.iter().flat_map(|s| s.routes.iter()) {
            if let RouteAction::Proxy(proxy) = &route.action {
                for target in std::iter::once(&proxy.target).chain(proxy.backup.as_ref()) {
                    if seen.insert(target.addr.clone()) {
                        out.push(target.addr.clone());
                    }
                }
            }
        }
        out
    }

    /// Serializable view for the admin API.
    pub fn summary(&self) -> Vec<ServerSummary> {
        self.servers
            .iter()
            .map(|block| ServerSummary {
                name: block.name.to_string(),
                hosts: block.hosts.iter().map(ToString::to_string).collect(),
                default: block.is_default,
                routes: block
                    .routes
                    .iter()
                    .map(|route| RouteSummary {
                        id: route.id().to_string(),
                        path: route.path.to_string(),
                        priority: route.priority,
                        action: match &route.action {
                            RouteAction::Proxy(p) => format!("proxy {}", p.target.addr),
                            RouteAction::Redirect { template, status } => {
                                format!("redirect {} {}", status.as_u16(), template)
                            }
                            RouteAction::NotFound => "404".to_string(),
                        },
                    })
                    .collect(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub hosts: Vec<String>,
    pub default: bool,
    pub routes: Vec<RouteSummary>,
}

#[derive(Debug, Serialize)]
pub struct RouteSummary {
    pub id: String,
    pub path: String,
    pub priority: i32,
    pub action: String,
}

fn compile_server(
    config: &ProxyConfig,
    server: &ServerConfig,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<ServerBlock> {
    let before = errors.len();
    let name: Arc<str> = Arc::from(server.name.as_str());

    let mut hosts = Vec::with_capacity(server.hosts.len());
    for (k, raw) in server.hosts.iter().enumerate() {
        match HostPattern::parse(raw) {
            Ok(pattern) => hosts.push(pattern),
            Err(e) => errors.push(ValidationError::new(format!("{field}.hosts[{k}]"), e)),
        }
    }

    let response_headers: HeaderList = parse_headers(
        &server.response_headers,
        &format!("{field}.response_headers"),
        errors,
    )
    .into();

    let mut routes = Vec::with_capacity(server.routes.len() + 1);
    for (j, route) in server.routes.iter().enumerate() {
        let route_field = format!("{field}.routes[{j}]");
        if let Some(route) = compile_route(config, server, route, j, &route_field, errors) {
            routes.push(Route {
                server: name.clone(),
                response_headers: response_headers.clone(),
                ..route
            });
        }
    }

    if !routes.iter().any(|r| r.path.is_catch_all()) {
        routes.push(Route {
            server: name.clone(),
            index: server.routes.len(),
            path: PathPattern::catch_all(),
            priority: i32::MIN,
            action: RouteAction::NotFound,
            require_tls: server.require_tls,
            response_headers: response_headers.clone(),
        });
    }

    if errors.len() > before {
        return None;
    }

    routes.sort_by_key(precedence_key);
    Some(ServerBlock {
        name,
        hosts,
        is_default: server.default,
        routes: routes.into_iter().map(Arc::new).collect(),
    })
}

fn compile_route(
    config: &ProxyConfig,
    server: &ServerConfig,
    route: &RouteConfig,
    index: usize,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<Route> {
    let before = errors.len();

    let path = PathPattern::parse(&route.path)
        .map_err(|e| errors.push(ValidationError::new(format!("{field}.path"), e)))
        .ok();

    let action = if let Some(raw) = &route.redirect {
        let status = StatusCode::from_u16(route.redirect_status.unwrap_or(301))
            .unwrap_or(StatusCode::MOVED_PERMANENTLY);
        RedirectTemplate::parse(raw)
            .map(|template| RouteAction::Redirect { template, status })
            .map_err(|e| errors.push(ValidationError::new(format!("{field}.redirect"), e)))
            .ok()
    } else if let Some(raw) = &route.proxy {
        compile_proxy(config, server, route, raw, field, errors).map(RouteAction::Proxy)
    } else {
        // validation already reported the missing action
        None
    };

    if errors.len() > before {
        return None;
    }
    Some(Route {
        server: Arc::from(""),
        index,
        path: path?,
        priority: route.priority,
        action: action?,
        require_tls: server.require_tls,
        response_headers: Arc::from(Vec::new()),
    })
}

fn compile_proxy(
    config: &ProxyConfig,
    server: &ServerConfig,
    route: &RouteConfig,
    raw: &str,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<ProxyAction> {
    let secs = |over: Option<u64>, global: u64| Duration::from_secs(over.unwrap_or(global));
    let max_body_size = route
        .max_body_size
        .or(server.max_body_size)
        .unwrap_or(config.listener.max_body_size)
        .as_u64();

    let build = |raw: &str, name: &str, errors: &mut Vec<ValidationError>| match TargetAddr::from_str(raw) {
        Ok(addr) => Some(Target {
            addr,
            max_body_size,
            connect_timeout: secs(route.connect_timeout_secs, config.timeouts.connect_secs),
            read_timeout: secs(route.read_timeout_secs, config.timeouts.read_secs),
            write_timeout: secs(route.write_timeout_secs, config.timeouts.write_secs),
        }),
        Err(e) => {
            errors.push(ValidationError::new(format!("{field}.{name}"), e));
            None
        }
    };

    let target = build(raw, "proxy", errors);
    let backup = match &route.backup {
        Some(raw) => Some(build(raw, "backup", errors)?),
        None => None,
    };

    let host_override = match &route.host_override {
        Some(host) => match HeaderValue::from_str(host) {
            Ok(value) => Some(value),
            Err(_) => {
                errors.push(ValidationError::new(
                    format!("{field}.host_override"),
                    format!("{host:?} is not a valid header value"),
                ));
                None
            }
        },
        None => None,
    };

    let set_headers = parse_headers(&route.set_headers, &format!("{field}.set_headers"), errors);

    Some(ProxyAction {
        target: target?,
        backup,
        host_override,
        set_headers,
    })
}

fn parse_headers<'a>(
    raw: impl IntoIterator<Item = (&'a String, &'a String)>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = Vec::new();
    for (name, value) in raw {
        match (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => headers.push((name, value)),
            _ => errors.push(ValidationError::new(
                format!("{field}.{name}"),
                "invalid header name or value",
            )),
        }
    }
    headers
}

fn check_duplicate_paths(block: &ServerBlock) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for route in &block.routes {
        if !seen.insert((route.path.to_string(), route.priority)) {
            return Err(ConfigError::Ambiguous(format!(
                "server {:?} declares path {:?} with priority {} more than once",
                block.name, route.path.to_string(), route.priority
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r#"
        [[servers]]
        name = "api"
        hosts = ["api.example.com"]
        max_body_size = "1k"

        [[servers.routes]]
        path = "/"
        proxy = "127.0.0.1:4001"

        [[servers.routes]]
        path = "/static/"
        proxy = "unix:/run/static.sock"
        max_body_size = 10

        [[servers.routes]]
        path = "= /health"
        proxy = "127.0.0.1:4002"

        [[servers.routes]]
        path = "~ \\.php$"
        proxy = "127.0.0.1:4003"

        [[servers]]
        name = "legacy"
        hosts = ["a.example.com"]

        [[servers.routes]]
        path = "/*"
        redirect = "https://b.example.com$uri"
    "#;

    fn target_of(route: &Route) -> String {
        match &route.action {
            RouteAction::Proxy(p) => p.target.addr.to_string(),
            RouteAction::Redirect { template, .. } => template.to_string(),
            RouteAction::NotFound => "404".into(),
        }
    }

    #[test]
    fn test_compile_and_lookup() {
        let table = RouteTable::compile(SITE).unwrap();
        assert_eq!(table.servers().len(), 2);

        let route = table.lookup("api.example.com", "/anything").unwrap();
        assert_eq!(target_of(&route), "127.0.0.1:4001");

        let route = table.lookup("API.example.com:8443", "/static/app.js").unwrap();
        assert_eq!(target_of(&route), "unix:/run/static.sock");

        let route = table.lookup("api.example.com", "/health").unwrap();
        assert_eq!(target_of(&route), "127.0.0.1:4002");

        let route = table.lookup("api.example.com", "/index.php").unwrap();
        assert_eq!(target_of(&route), "127.0.0.1:4003");

        assert!(table.lookup("unknown.example.com", "/").is_none());
    }

    #[test]
    fn test_lookup_normalises_path() {
        let table = RouteTable::compile(SITE).unwrap();

        let route = table.lookup("api.example.com", "/static/../health").unwrap();
        assert_eq!(target_of(&route), "127.0.0.1:4002");

        let route = table.lookup("api.example.com", "//static//app.js").unwrap();
        assert_eq!(target_of(&route), "unix:/run/static.sock");

        let route = table.lookup("api.example.com", "/%73tatic/app.js").unwrap();
        assert_eq!(target_of(&route), "unix:/run/static.sock");
    }

    #[test]
    fn test_missing_host_reaches_default_block_only() {
        let table = RouteTable::compile(SITE).unwrap();
        assert!(table.lookup("", "/").is_none());

        let table = RouteTable::compile(&SITE.replace(
            "hosts = [\"a.example.com\"]",
            "hosts = [\"a.example.com\"]\n        default = true",
        ))
        .unwrap();
        let route = table.lookup("", "/x").unwrap();
        assert_eq!(&*route.server, "legacy");
    }

    #[test]
    fn test_limits_inherit() {
        let table = RouteTable::compile(SITE).unwrap();
        let limit = |path: &str| match &table.lookup("api.example.com", path).unwrap().action {
            RouteAction::Proxy(p) => p.target.max_body_size,
            _ => unreachable!(),
        };
        assert_eq!(limit("/"), 1024);
        assert_eq!(limit("/static/x"), 10);
    }

    #[test]
    fn test_catch_all_is_synthesised() {
        let table = RouteTable::compile(
            r#"
            [[servers]]
            name = "docs"
            hosts = ["docs.example.com"]

            [[servers.routes]]
            path = "/guide"
            proxy = "127.0.0.1:5000"
            "#,
        )
        .unwrap();

        let route = table.lookup("docs.example.com", "/other").unwrap();
        assert!(matches!(route.action, RouteAction::NotFound));
        assert!(route.path.is_catch_all());
        assert_eq!(table.servers()[0].routes.last().unwrap().id().to_string(), "docs#1");
    }

    #[test]
    fn test_duplicate_host_is_ambiguous() {
        let err = RouteTable::compile(
            r#"
            [[servers]]
            name = "a"
            hosts = ["x.example.com"]

            [[servers]]
            name = "b"
            hosts = ["X.example.com"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Ambiguous(_)), "{err}");
    }

    #[test]
    fn test_duplicate_path_and_priority_is_ambiguous() {
        let text = |second_priority: i32| {
            format!(
                r#"
                [[servers]]
                name = "a"
                hosts = ["x.example.com"]

                [[servers.routes]]
                path = "/api"
                proxy = "127.0.0.1:1"

                [[servers.routes]]
                path = "/api"
                proxy = "127.0.0.1:2"
                priority = {second_priority}
                "#
            )
        };
        assert!(matches!(RouteTable::compile(&text(0)), Err(ConfigError::Ambiguous(_))));

        let table = RouteTable::compile(&text(5)).unwrap();
        let route = table.lookup("x.example.com", "/api").unwrap();
        assert_eq!(target_of(&route), "127.0.0.1:2");
    }

    #[test]
    fn test_bad_patterns_are_collected() {
        let err = RouteTable::compile(
            r#"
            [[servers]]
            name = "a"
            hosts = ["a.*.example.com"]

            [[servers.routes]]
            path = "nope"
            proxy = "unix:relative.sock"

            [[servers.routes]]
            path = "/r"
            redirect = "https://x$nope"
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Invalid(errors) => assert_eq!(errors.len(), 4, "{errors:?}"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_targets_are_deduplicated() {
        let table = RouteTable::compile(SITE).unwrap();
        assert_eq!(table.targets().len(), 4);
    }
}
