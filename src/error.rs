//! Error types for crossroad.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal errors raised while turning a configuration into a [`Handler`].
///
/// [`Handler`]: crate::handler::Handler
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid group {name:?}: {source}")]
    Group {
        name: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid listen address {0:?}")]
    Listen(String),

    #[error("group {0:?} is required")]
    MissingGroup(&'static str),

    #[error("dns of group {0:?} cannot be empty")]
    EmptyGroup(String),

    #[error("invalid socks5 address {0:?} for group {1:?}")]
    Socks5(String, String),

    #[error("failed to decode base64 rule list {path:?}: {source}")]
    Base64 {
        path: PathBuf,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to build DoH client for {url}: {source}")]
    DohClient {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to create ipset {name:?}: {source}")]
    IpSet {
        name: String,
        #[source]
        source: FirewallError,
    },
}

/// Failure of a single upstream call.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid TLS server name {0:?}")]
    ServerName(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("socks5: {0}")]
    Socks5(String),

    #[error("malformed response: {0}")]
    Malformed(&'static str),
}

/// Failure of a routing group to produce an answer.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("group has no callers")]
    NoCallers,

    #[error("all callers failed, last error: {0}")]
    Exhausted(#[source] CallError),

    #[error("all {} callers failed: {}", .0.len(), join_errors(.0))]
    AllFailed(Vec<CallError>),
}

fn join_errors(errors: &[CallError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure talking to the packet filter.
#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("failed to run ipset: {0}")]
    Spawn(#[from] io::Error),

    #[error("ipset {args} failed: {stderr}")]
    Command { args: String, stderr: String },
}
