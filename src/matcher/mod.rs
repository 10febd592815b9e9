//! Domain matching against adblock-style rule sets.
//!
//! A [`Matcher`] answers "does this domain match the rule set". Rules keep
//! their load order and the first matching rule decides; an exclusion rule
//! winning means no match. Lookups walk the query's label suffixes through a
//! hash index instead of scanning every rule.

mod abp;

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::ConfigError;

pub use abp::{Rule, parse_line};

#[derive(Debug, Clone, Copy)]
struct IndexedRule {
    order: usize,
    subdomains_only: bool,
    exclude: bool,
}

/// Immutable, indexed rule set.
#[derive(Debug, Default)]
pub struct Matcher {
    rules: FxHashMap<String, Vec<IndexedRule>>,
    len: usize,
}

impl Matcher {
    /// Build a matcher from rule text, one rule per line.
    pub fn from_text(text: &str) -> Self {
        let mut matcher = Self::default();
        matcher.extend_text(text);
        matcher
    }

    /// Build a matcher from individual rule lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::default();
        for line in lines {
            matcher.push_line(line.as_ref());
        }
        matcher
    }

    /// Load a rule file, optionally base64-encoded as gfwlist is distributed.
    pub fn from_file(path: impl AsRef<Path>, base64: bool) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let bytes = if base64 {
            let compact: Vec<u8> = raw
                .into_iter()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            STANDARD
                .decode(compact)
                .map_err(|source| ConfigError::Base64 {
                    path: path.to_path_buf(),
                    source,
                })?
        } else {
            raw
        };

        let matcher = Self::from_text(&String::from_utf8_lossy(&bytes));
        debug!(path = %path.display(), rules = matcher.len(), "loaded rule list");
        Ok(matcher)
    }

    /// Append rules after the existing ones; malformed lines are skipped.
    pub fn extend_text(&mut self, text: &str) {
        for line in text.lines() {
            self.push_line(line);
        }
    }

    fn push_line(&mut self, line: &str) {
        let Some(rule) = parse_line(line) else {
            return;
        };
        let indexed = IndexedRule {
            order: self.len,
            subdomains_only: rule.subdomains_only,
            exclude: rule.exclude,
        };
        self.rules.entry(rule.domain).or_default().push(indexed);
        self.len += 1;
    }

    /// Check whether a domain matches the rule set.
    ///
    /// Case-insensitive; a trailing dot is ignored.
    pub fn matches(&self, domain: &str) -> bool {
        if self.len == 0 {
            return false;
        }

        let domain = domain.trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            return false;
        }

        let mut winner: Option<IndexedRule> = None;
        let mut current = domain.as_str();

        loop {
            if let Some(candidates) = self.rules.get(current) {
                let is_bare = current.len() == domain.len();
                for rule in candidates {
                    if rule.subdomains_only && is_bare {
                        continue;
                    }
                    if winner.is_none_or(|w| rule.order < w.order) {
                        winner = Some(*rule);
                    }
                }
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => break,
            }
        }

        winner.is_some_and(|rule| !rule.exclude)
    }

    /// Number of rules loaded.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_rule_matches_domain_and_subdomains() {
        let matcher = Matcher::from_text("example.com");

        assert!(matcher.matches("example.com"));
        assert!(matcher.matches("a.example.com"));
        assert!(matcher.matches("deep.a.example.com"));
        assert!(!matcher.matches("notexample.com"));
        assert!(!matcher.matches("example.org"));
    }

    #[test]
    fn subdomain_rule_skips_bare_domain() {
        for rule in [".example.com", "*.example.com"] {
            let matcher = Matcher::from_text(rule);

            assert!(matcher.matches("a.example.com"), "rule {rule}");
            assert!(!matcher.matches("example.com"), "rule {rule}");
        }
    }

    #[test]
    fn matches_case_insensitive_with_trailing_dot() {
        let matcher = Matcher::from_text("example.com");

        assert!(matcher.matches("WWW.Example.COM."));
    }

    #[test]
    fn first_matching_rule_wins() {
        let excluded_first = Matcher::from_text("@@www.example.com\nexample.com");
        assert!(!excluded_first.matches("www.example.com"));
        assert!(excluded_first.matches("mail.example.com"));

        let included_first = Matcher::from_text("example.com\n@@www.example.com");
        assert!(included_first.matches("www.example.com"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let matcher = Matcher::from_text("! header\n\n/regex/\nex*mple.com\ngood.com\n");

        assert_eq!(matcher.len(), 1);
        assert!(matcher.matches("good.com"));
    }

    #[test]
    fn empty_matcher_never_matches() {
        let matcher = Matcher::default();

        assert!(!matcher.matches("example.com"));
        assert!(!matcher.matches(""));
    }

    #[test]
    fn extend_text_concatenates_rule_sets() {
        let mut matcher = Matcher::from_lines(["@@keep.example.com"]);
        matcher.extend_text("example.com");

        assert!(!matcher.matches("keep.example.com"));
        assert!(matcher.matches("other.example.com"));
    }

    #[test]
    fn from_file_decodes_base64() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let encoded = STANDARD.encode("[AutoProxy 0.2.9]\n||google.com\n.twitter.com\n");
        // gfwlist wraps its payload at 64 columns
        for chunk in encoded.as_bytes().chunks(64) {
            file.write_all(chunk).unwrap();
            file.write_all(b"\n").unwrap();
        }

        let matcher = Matcher::from_file(file.path(), true).unwrap();

        assert_eq!(matcher.len(), 2);
        assert!(matcher.matches("www.google.com"));
        assert!(matcher.matches("api.twitter.com"));
        assert!(!matcher.matches("twitter.com"));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let result = Matcher::from_file("/nonexistent/gfwlist.txt", false);

        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
