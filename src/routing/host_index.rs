//! Host → server block index.
//!
//! Exact names live in a hash map, wildcards in a trie keyed by reversed host
//! labels (`a.example.com` walks `com → example → a`), and regex patterns in a
//! declaration-ordered fallback list. Built once per table, read-only after.

use std::cmp::Reverse;
use std::collections::HashMap;

use regex::Regex;

use crate::routing::matcher::HostPattern;

#[derive(Debug, Default)]
struct LabelNode {
    children: HashMap<String, LabelNode>,
    /// Block for `*.<suffix>` (strict subdomains).
    subdomains: Option<usize>,
    /// Block for `.<suffix>` when the host equals the suffix.
    apex: Option<usize>,
}

#[derive(Debug)]
struct RegexEntry {
    regex: Regex,
    source: String,
    literal_prefix: usize,
    server: usize,
}

#[derive(Debug, Default)]
pub struct HostIndex {
    exact: HashMap<String, usize>,
    wildcards: LabelNode,
    regexes: Vec<RegexEntry>,
    default: Option<usize>,
}

impl HostIndex {
    /// Register a pattern for a server block.
    ///
    /// Fails with the conflicting block index when the same pattern is
    /// already claimed by a different block.
    pub fn insert(&mut self, pattern: &HostPattern, server: usize) -> Result<(), usize> {
        match pattern {
            HostPattern::Exact(host) => claim(self.exact.entry(host.clone()).or_insert(server), server),
            HostPattern::Wildcard { suffix, include_apex } => {
                let mut node = &mut self.wildcards;
                for label in suffix.rsplit('.') {
                    node = node.children.entry(label.to_string()).or_default();
                }
                claim(node.subdomains.get_or_insert(server), server)?;
                if *include_apex {
                    claim(node.apex.get_or_insert(server), server)?;
                }
                Ok(())
            }
            HostPattern::Regex {
                regex,
                source,
                literal_prefix,
            } => {
                if let Some(existing) = self.regexes.iter().find(|e| e.source == *source) {
                    return claim(&existing.server, server);
                }
                self.regexes.push(RegexEntry {
                    regex: regex.clone(),
                    source: source.clone(),
                    literal_prefix: *literal_prefix,
                    server,
                });
                Ok(())
            }
        }
    }

    pub fn set_default(&mut self, server: usize) {
        self.default = Some(server);
    }

    /// Resolve a normalised host to a server block.
    ///
    /// exact > deepest wildcard > regex (longest literal prefix, then
    /// declaration order) > default block. A request without a host only
    /// reaches the default block.
    pub fn lookup(&self, host: &str) -> Option<usize> {
        if host.is_empty() {
            return self.default;
        }
        if let Some(&server) = self.exact.get(host) {
            return Some(server);
        }
        if let Some(server) = self.lookup_wildcard(host) {
            return Some(server);
        }
        let regex_hit = self
            .regexes
            .iter()
            .enumerate()
            .filter(|(_, e)| e.regex.is_match(host))
            .max_by_key(|(order, e)| (e.literal_prefix, Reverse(*order)))
            .map(|(_, e)| e.server);
        regex_hit.or(self.default)
    }

    fn lookup_wildcard(&self, host: &str) -> Option<usize> {
        let labels: Vec<&str> = host.rsplit('.').collect();
        let mut node = &self.wildcards;
        let mut best = None;
        for (depth, label) in labels.iter().enumerate() {
            node = match node.children.get(*label) {
                Some(next) => next,
                None => break,
            };
            let consumed = depth + 1;
            if consumed < labels.len() {
                best = node.subdomains.or(best);
            } else {
                best = node.apex.or(best);
            }
        }
        best
    }
}

fn claim(existing: &usize, server: usize) -> Result<(), usize> {
    if *existing == server {
        Ok(())
    } else {
        Err(*existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(patterns: &[(&str, usize)]) -> HostIndex {
        let mut index = HostIndex::default();
        for (raw, server) in patterns {
            index.insert(&HostPattern::parse(raw).unwrap(), *server).unwrap();
        }
        index
    }

    #[test]
    fn test_exact_beats_wildcard_beats_regex() {
        let hosts = index(&[
            ("~^api\\..*$", 2),
            ("*.example.com", 1),
            ("api.example.com", 0),
        ]);
        assert_eq!(hosts.lookup("api.example.com"), Some(0));
        assert_eq!(hosts.lookup("www.example.com"), Some(1));
        assert_eq!(hosts.lookup("api.other.org"), Some(2));
        assert_eq!(hosts.lookup("other.org"), None);
    }

    #[test]
    fn test_deepest_wildcard_wins() {
        let hosts = index(&[("*.example.com", 0), ("*.api.example.com", 1), (".cdn.example.com", 2)]);
        assert_eq!(hosts.lookup("a.example.com"), Some(0));
        assert_eq!(hosts.lookup("v1.api.example.com"), Some(1));
        assert_eq!(hosts.lookup("api.example.com"), Some(0));
        assert_eq!(hosts.lookup("cdn.example.com"), Some(2));
        assert_eq!(hosts.lookup("img.cdn.example.com"), Some(2));
        assert_eq!(hosts.lookup("example.com"), None);
    }

    #[test]
    fn test_regex_tie_break() {
        // both match "c4.ppy.sh": longer literal prefix wins
        let by_prefix = index(&[(r"~^c.*\.ppy\.sh$", 0), (r"~^c4\.ppy\.sh$", 1)]);
        assert_eq!(by_prefix.lookup("c4.ppy.sh"), Some(1));
        assert_eq!(by_prefix.lookup("ce.ppy.sh"), Some(0));

        // equal literal prefixes: first declared wins
        let by_order = index(&[(r"~^a.*$", 3), (r"~^a[a-z]+$", 4)]);
        assert_eq!(by_order.lookup("abc"), Some(3));
    }

    #[test]
    fn test_default_block() {
        let mut hosts = index(&[("a.example.com", 0)]);
        hosts.set_default(1);
        assert_eq!(hosts.lookup("unknown.test"), Some(1));
        assert_eq!(hosts.lookup("a.example.com"), Some(0));
        assert_eq!(hosts.lookup(""), Some(1));
    }

    #[test]
    fn test_empty_host_skips_regexes() {
        let hosts = index(&[("~.*", 0)]);
        assert_eq!(hosts.lookup("anything.test"), Some(0));
        assert_eq!(hosts.lookup(""), None);
    }

    #[test]
    fn test_conflicting_claims() {
        let mut index = HostIndex::default();
        let pattern = HostPattern::parse("a.example.com").unwrap();
        assert!(index.insert(&pattern, 0).is_ok());
        assert!(index.insert(&pattern, 0).is_ok());
        assert_eq!(index.insert(&pattern, 1), Err(0));

        let wildcard = HostPattern::parse("*.example.com").unwrap();
        assert!(index.insert(&wildcard, 2).is_ok());
        assert_eq!(index.insert(&HostPattern::parse(".example.com").unwrap(), 3), Err(2));
    }
}
