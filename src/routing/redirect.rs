//! Redirect target templates.
//!
//! Templates are literal URLs with nginx-style variables, compiled once:
//! `$uri` (path), `$request_uri` (path and query), `$args` (query),
//! `$host` and `$scheme`. `${name}` is accepted too.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Var {
    Uri,
    RequestUri,
    Args,
    Host,
    Scheme,
}

impl Var {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "uri" => Some(Var::Uri),
            "request_uri" => Some(Var::RequestUri),
            "args" | "query_string" => Some(Var::Args),
            "host" => Some(Var::Host),
            "scheme" => Some(Var::Scheme),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Var(Var),
}

/// The request values a template can substitute.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
}

/// A compiled redirect template.
#[derive(Debug, Clone)]
pub struct RedirectTemplate {
    source: String,
    parts: Vec<Part>,
}

impl RedirectTemplate {
    pub fn parse(source: &str) -> Result<Self, String> {
        let source = source.trim();
        if source.is_empty() {
            return Err("redirect target is empty".to_string());
        }

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
                let end = braced
                    .find('}')
                    .ok_or_else(|| format!("unterminated `${{` in {source:?}"))?;
                (&braced[..end], end + 2)
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            };

            if name.is_empty() {
                literal.push('$');
                rest = after;
                continue;
            }
            let var = Var::from_name(name)
                .ok_or_else(|| format!("unknown variable `${name}` in {source:?}"))?;
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            parts.push(Part::Var(var));
            rest = &after[consumed..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// Substitute request values.
    pub fn expand(&self, req: &RequestParts<'_>) -> String {
        let mut out = String::with_capacity(self.source.len() + req.path.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Var(Var::Uri) => out.push_str(req.path),
                Part::Var(Var::RequestUri) => {
                    out.push_str(req.path);
                    if let Some(query) = req.query {
                        out.push('?');
                        out.push_str(query);
                    }
                }
                Part::Var(Var::Args) => out.push_str(req.query.unwrap_or_default()),
                Part::Var(Var::Host) => out.push_str(req.host),
                Part::Var(Var::Scheme) => out.push_str(req.scheme),
            }
        }
        out
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for RedirectTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
