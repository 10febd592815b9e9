//! Adblock-style rule line parser.
//!
//! Only the domain part of a rule is kept; URL paths, options and element
//! hiding syntax are discarded or cause the line to be skipped.

/// One parsed domain rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Lowercase domain without leading dot or wildcard.
    pub domain: String,
    /// `.example.com` / `*.example.com`: the bare domain itself does not match.
    pub subdomains_only: bool,
    /// `@@` prefix: a winning exclusion rule means "no match".
    pub exclude: bool,
}

/// Parse a single rule line, returning `None` for comments, headers, blank
/// lines and anything that does not reduce to a domain.
///
/// Accepted forms:
/// - `example.com` and `||example.com^`: the domain and all subdomains
/// - `.example.com`, `*.example.com`, `||*.example.com^`: subdomains only
/// - `|http://example.com/path` and `https://example.com/path`: the host
/// - any of the above prefixed with `@@`
pub fn parse_line(line: &str) -> Option<Rule> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
        return None;
    }

    let (exclude, rest) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest),
        None => (false, line),
    };

    // Element hiding and regex rules carry no domain
    if rest.starts_with('/') || rest.contains("##") || rest.contains("#@#") {
        return None;
    }

    let host = if let Some(anchored) = rest.strip_prefix("||") {
        anchored
    } else if let Some(url) = rest.strip_prefix('|') {
        strip_scheme(url)?
    } else if rest.starts_with("http://") || rest.starts_with("https://") {
        strip_scheme(rest)?
    } else {
        rest
    };

    let end = host.find(['^', '/', '$', '|', ':', '?']).unwrap_or(host.len());
    let host = &host[..end];

    let (subdomains_only, domain) = if let Some(d) = host.strip_prefix("*.") {
        (true, d)
    } else if let Some(d) = host.strip_prefix('.') {
        (true, d)
    } else {
        (false, host)
    };

    if !is_valid_domain(domain) {
        return None;
    }

    Some(Rule {
        domain: domain.to_lowercase(),
        subdomains_only,
        exclude,
    })
}

fn strip_scheme(url: &str) -> Option<&str> {
    url.strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && domain
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'_')
}
