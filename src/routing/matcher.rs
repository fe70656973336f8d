//! Route matching logic.
//!
//! # Responsibilities
//! - Parse host patterns (exact, wildcard, regex) and path patterns
//!   (exact, prefix, regex) once at compile time
//! - Order path rules inside a server block by precedence
//! - Resolve `(host, path)` to a single route over one table snapshot
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - Path matching is case-sensitive unless the rule is `~*`
//! - Paths are matched after normalisation: escaped unreserved characters
//!   decoded, repeated slashes merged, `.` and `..` resolved
//! - Host narrows to a server block first; path precedence only applies
//!   inside that block, so a more specific host always beats a more specific
//!   path in another block
//! - Deterministic: same input always matches same route

use std::borrow::Cow;
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::routing::table::{Route, RouteTable};

/// A compiled host pattern.
#[derive(Debug, Clone)]
pub enum HostPattern {
    /// `example.com`
    Exact(String),
    /// `*.example.com` (subdomains only) or `.example.com` (apex too).
    Wildcard { suffix: String, include_apex: bool },
    /// `~^c[e4-6]?\.example\.com$`
    Regex {
        regex: Regex,
        source: String,
        literal_prefix: usize,
    },
}

impl HostPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Some(source) = raw.strip_prefix('~') {
            let source = source.trim();
            let regex = RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .map_err(|e| format!("invalid host regex {source:?}: {e}"))?;
            return Ok(HostPattern::Regex {
                literal_prefix: literal_prefix_len(source),
                source: source.to_string(),
                regex,
            });
        }

        let lowered = raw.to_ascii_lowercase();
        let (suffix, include_apex) = if let Some(rest) = lowered.strip_prefix("*.") {
            (rest, false)
        } else if let Some(rest) = lowered.strip_prefix('.') {
            (rest, true)
        } else {
            if lowered.contains('*') {
                return Err(format!("wildcard must be a leading `*.` label in {raw:?}"));
            }
            return Ok(HostPattern::Exact(lowered.trim_end_matches('.').to_string()));
        };

        if suffix.is_empty() || suffix.contains('*') {
            return Err(format!("invalid wildcard host {raw:?}"));
        }
        Ok(HostPattern::Wildcard {
            suffix: suffix.trim_end_matches('.').to_string(),
            include_apex,
        })
    }

    /// Check a normalised host against this pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(expected) => host == expected,
            HostPattern::Wildcard { suffix, include_apex } => {
                if host == suffix {
                    return *include_apex;
                }
                host.len() > suffix.len()
                    && host.ends_with(suffix.as_str())
                    && host[..host.len() - suffix.len()].ends_with('.')
            }
            HostPattern::Regex { regex, .. } => regex.is_match(host),
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPattern::Exact(host) => f.write_str(host),
            HostPattern::Wildcard { suffix, include_apex: false } => write!(f, "*.{suffix}"),
            HostPattern::Wildcard { suffix, include_apex: true } => write!(f, ".{suffix}"),
            HostPattern::Regex { source, .. } => write!(f, "~{source}"),
        }
    }
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub enum PathPattern {
    /// `= /exact`
    Exact(String),
    /// `/prefix`, `/prefix/*`
    Prefix(String),
    /// `~ regex` or `~* regex`
    Regex {
        regex: Regex,
        source: String,
        case_insensitive: bool,
    },
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();

        if let Some(rest) = raw.strip_prefix("~*") {
            return Self::regex(rest.trim(), true);
        }
        if let Some(rest) = raw.strip_prefix('~') {
            return Self::regex(rest.trim(), false);
        }
        if let Some(rest) = raw.strip_prefix('=') {
            let path = rest.trim();
            if !path.starts_with('/') {
                return Err(format!("exact path {path:?} must start with '/'"));
            }
            return Ok(PathPattern::Exact(path.to_string()));
        }

        if !raw.starts_with('/') {
            return Err(format!("path {raw:?} must start with '/'"));
        }
        let prefix = raw.strip_suffix('*').unwrap_or(raw);
        if prefix.contains('*') || !prefix.ends_with('/') && raw.ends_with('*') {
            return Err(format!("`*` is only allowed as a trailing `/*` in {raw:?}"));
        }
        Ok(PathPattern::Prefix(prefix.to_string()))
    }

    fn regex(source: &str, case_insensitive: bool) -> Result<Self, String> {
        if source.is_empty() {
            return Err("empty path regex".to_string());
        }
        let regex = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| format!("invalid path regex {source:?}: {e}"))?;
        Ok(PathPattern::Regex {
            regex,
            source: source.to_string(),
            case_insensitive,
        })
    }

    /// The synthesised fallback rule.
    pub fn catch_all() -> Self {
        PathPattern::Prefix("/".to_string())
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, PathPattern::Prefix(p) if p == "/")
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(expected) => path == expected,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Regex { regex, .. } => regex.is_match(path),
        }
    }

    /// Specificity used to order rules with equal priority:
    /// exact > longest prefix > regex > catch-all.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            PathPattern::Exact(p) => (3, p.len()),
            PathPattern::Prefix(_) if self.is_catch_all() => (0, 1),
            PathPattern::Prefix(p) => (2, p.len()),
            PathPattern::Regex { .. } => (1, 0),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(p) => write!(f, "= {p}"),
            PathPattern::Prefix(p) => f.write_str(p),
            PathPattern::Regex { source, case_insensitive: true, .. } => write!(f, "~* {source}"),
            PathPattern::Regex { source, .. } => write!(f, "~ {source}"),
        }
    }
}

/// Sort key for rules inside one server block. Smaller sorts first.
pub(crate) fn precedence_key(route: &Route) -> (Reverse<i32>, Reverse<(u8, usize)>, usize) {
    (
        Reverse(route.priority),
        Reverse(route.path.specificity()),
        route.index,
    )
}

/// Number of literal characters a regex starts with (after an optional `^`).
fn literal_prefix_len(source: &str) -> usize {
    let mut chars = source.strip_prefix('^').unwrap_or(source).chars();
    let mut len = 0;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) if !escaped.is_ascii_alphanumeric() => len += 1,
                _ => break,
            },
            '.' | '[' | ']' | '(' | ')' | '{' | '}' | '*' | '+' | '?' | '|' | '$' | '^' => break,
            _ => len += 1,
        }
    }
    len
}

/// Normalise a Host header or URI authority: lowercase, no port, no trailing dot.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        // IPv6 literal, keep the brackets
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Normalise a request path before matching.
///
/// `%XX` escapes of unreserved characters are decoded, `//` runs collapse to
/// one slash, `.` segments are dropped and `..` removes the previous segment
/// (never climbing above `/`). Other escapes are left as sent. Paths that do
/// not start with `/` (e.g. `*`) are returned unchanged.
pub fn normalize_path(raw: &str) -> Cow<'_, str> {
    let dot_segment = raw.split('/').any(|s| s == "." || s == "..");
    if !raw.starts_with('/') || !(dot_segment || raw.contains("//") || raw.contains('%')) {
        return Cow::Borrowed(raw);
    }

    let decoded = decode_unreserved(raw);
    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = false;
    for segment in decoded.split('/').skip(1) {
        trailing_slash = true;
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => {
                segments.push(segment);
                trailing_slash = false;
            }
        }
    }

    let mut path = String::with_capacity(decoded.len());
    for segment in &segments {
        path.push('/');
        path.push_str(segment);
    }
    if trailing_slash || segments.is_empty() {
        path.push('/');
    }
    Cow::Owned(path)
}

fn decode_unreserved(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                let decoded = (hi << 4) | lo;
                if decoded.is_ascii_alphanumeric() || matches!(decoded, b'-' | b'.' | b'_' | b'~') {
                    out.push(decoded);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| raw.to_string())
}

fn hex(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Find the single best route for a request in one snapshot.
///
/// Returns `None` when no server block accepts the host, or when the path
/// cannot match even the catch-all (e.g. `*`). An empty host only reaches
/// the default block.
pub fn match_route<'t>(table: &'t RouteTable, host: &str, path: &str) -> Option<&'t Arc<Route>> {
    let host = normalize_host(host);
    let path = normalize_path(path);
    let block = table.server_for_host(&host)?;
    block.routes.iter().find(|route| route.path.matches(&path))
}
