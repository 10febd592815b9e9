//! TOML configuration and handler construction.
//!
//! ```toml
//! listen = "0.0.0.0:53"
//! gfwlist = "gfwlist.txt"
//! cnip = "cnip.txt"
//!
//! [groups.clean]
//! dns = ["223.5.5.5", "119.29.29.29:53/tcp"]
//!
//! [groups.dirty]
//! socks5 = "127.0.0.1:1080"
//! dot = ["1.1.1.1:853@cloudflare-dns.com"]
//! doh = ["https://dns.google/dns-query"]
//! concurrent = true
//! ```

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::DnsCache;
use crate::cnip::CnIpSet;
use crate::error::ConfigError;
use crate::firewall::IpSet;
use crate::group::{CLEAN, DIRTY, Group};
use crate::handler::Handler;
use crate::hosts::HostsReader;
use crate::matcher::Matcher;
use crate::outbound::{
    Caller, DEFAULT_TIMEOUT, DnsCaller, DohCaller, DotCaller, Network, is_doh_url,
};
use crate::socks5::Socks5Dialer;

const DNS_PORT: u16 = 53;
const DOT_PORT: u16 = 853;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Deny-list routed to the `dirty` group.
    #[serde(default = "default_gfwlist")]
    pub gfwlist: PathBuf,

    #[serde(default = "default_true")]
    pub gfwlist_b64: bool,

    #[serde(default = "default_cnip")]
    pub cnip: PathBuf,

    #[serde(default)]
    pub hosts_files: Vec<PathBuf>,

    /// Seconds between hosts file reloads; 0 disables reloading.
    #[serde(default)]
    pub hosts_reload: u64,

    /// Inline `name = "address"` overrides.
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,

    /// Per-caller timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub reroute_foreign: bool,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Kept as a raw table so declaration order survives deserialization.
    #[serde(default)]
    pub groups: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_size")]
    pub size: i64,
    #[serde(default = "default_min_ttl")]
    pub min_ttl: u64,
    #[serde(default = "default_max_ttl")]
    pub max_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            min_ttl: default_min_ttl(),
            max_ttl: default_max_ttl(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupConfig {
    pub socks5: Option<String>,
    pub ipset: Option<String>,
    /// Per-entry ipset timeout in seconds; 0 means entries never expire.
    pub ipset_ttl: u32,
    pub dns: Vec<String>,
    pub dot: Vec<String>,
    pub doh: Vec<String>,
    pub concurrent: bool,
    pub rules: Vec<String>,
}

fn default_listen() -> String {
    "0.0.0.0:53".to_string()
}

fn default_gfwlist() -> PathBuf {
    PathBuf::from("gfwlist.txt")
}

fn default_cnip() -> PathBuf {
    PathBuf::from("cnip.txt")
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_cache_size() -> i64 {
    4096
}

fn default_min_ttl() -> u64 {
    60
}

fn default_max_ttl() -> u64 {
    86400
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Listen address; a bare `:port` binds every IPv4 interface.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = self.listen.trim();
        let full = match listen.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => listen.to_string(),
        };
        full.parse()
            .map_err(|_| ConfigError::Listen(self.listen.clone()))
    }

    fn caller_timeout(&self) -> Duration {
        match self.timeout {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }

    /// Group configurations in declaration order.
    pub fn group_configs(&self) -> Result<Vec<(String, GroupConfig)>, ConfigError> {
        self.groups
            .iter()
            .map(|(name, value)| {
                let group = value
                    .clone()
                    .try_into::<GroupConfig>()
                    .map_err(|source| ConfigError::Group {
                        name: name.clone(),
                        source,
                    })?;
                Ok((name.clone(), group))
            })
            .collect()
    }

    /// Validate the configuration and build a ready handler.
    ///
    /// Every fallible step runs before ipsets are created, so a rejected
    /// configuration leaves the live firewall sets untouched. Must be called
    /// inside a runtime when hosts files are reloaded on a timer.
    pub fn build_handler(&self) -> Result<Handler, ConfigError> {
        let group_configs = self.group_configs()?;
        for name in [CLEAN, DIRTY] {
            let (_, group) = group_configs
                .iter()
                .find(|(n, _)| n == name)
                .ok_or(ConfigError::MissingGroup(name))?;
            if group.dns.is_empty() && group.dot.is_empty() && group.doh.is_empty() {
                return Err(ConfigError::EmptyGroup(name.to_string()));
            }
        }
        self.listen_addr()?;

        let timeout = self.caller_timeout();
        let groups = group_configs
            .iter()
            .map(|(name, group)| build_group(name, group, timeout))
            .collect::<Result<Vec<_>, _>>()?;

        let gfwlist = Matcher::from_file(&self.gfwlist, self.gfwlist_b64)?;
        let cnip = CnIpSet::from_file(&self.cnip)?;
        let cache = DnsCache::new(
            self.cache.size,
            Duration::from_secs(self.cache.min_ttl),
            Duration::from_secs(self.cache.max_ttl),
        );
        Handler::check_groups(&groups)?;

        let groups = groups
            .into_iter()
            .zip(&group_configs)
            .map(|(group, (_, config))| attach_ipset(group, config))
            .collect::<Result<Vec<_>, _>>()?;

        let handler = Handler::new(groups)?
            .with_hosts(self.build_hosts())
            .with_cache(cache)
            .with_gfwlist(gfwlist)
            .with_cnip(cnip)
            .reroute_foreign(self.reroute_foreign);

        for group in handler.groups() {
            info!(group = group.name(), callers = ?group.callers(), "loaded group");
        }
        info!(rules = handler.gfwlist_len(), "loaded gfwlist");
        Ok(handler)
    }

    fn build_hosts(&self) -> Vec<Arc<HostsReader>> {
        let mut readers = Vec::new();

        if !self.hosts.is_empty() {
            let text: String = self
                .hosts
                .iter()
                .map(|(name, addr)| format!("{addr} {name}\n"))
                .collect();
            readers.push(Arc::new(HostsReader::from_text(&text)));
        }

        let reload = Duration::from_secs(self.hosts_reload);
        for path in &self.hosts_files {
            match HostsReader::from_file(path, reload) {
                Ok(reader) => readers.push(reader),
                Err(err) => warn!(path = %path.display(), "skipping hosts file: {err}"),
            }
        }

        readers
    }
}

fn build_group(name: &str, config: &GroupConfig, timeout: Duration) -> Result<Group, ConfigError> {
    let dialer = match config.socks5.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(proxy) if is_host_port(proxy) => Some(Socks5Dialer::new(proxy)),
        Some(proxy) => return Err(ConfigError::Socks5(proxy.to_string(), name.to_string())),
    };

    let mut callers = Vec::new();
    for entry in &config.dns {
        let Some((addr, network)) = parse_dns_addr(entry) else {
            continue;
        };
        callers.push(Caller::Dns(DnsCaller::new(addr, network, dialer.clone(), timeout)));
    }
    for entry in &config.dot {
        let Some((addr, server_name)) = parse_dot_addr(entry) else {
            warn!(group = name, %entry, "skipping invalid dot address");
            continue;
        };
        match DotCaller::new(addr, &server_name, dialer.clone(), timeout) {
            Ok(caller) => callers.push(Caller::Dot(caller)),
            Err(err) => warn!(group = name, %entry, "skipping dot upstream: {err}"),
        }
    }
    for entry in &config.doh {
        let url = entry.trim();
        if !is_doh_url(url) {
            warn!(group = name, %entry, "skipping invalid doh url");
            continue;
        }
        let caller = DohCaller::new(url, dialer.as_ref(), timeout).map_err(|source| {
            ConfigError::DohClient {
                url: url.to_string(),
                source,
            }
        })?;
        callers.push(Caller::Doh(caller));
    }

    let mut group = Group::new(name, callers).concurrent(config.concurrent);
    if !config.rules.is_empty() {
        group = group.with_matcher(Matcher::from_lines(&config.rules));
    }

    Ok(group)
}

/// Create the group's ipset, flushing any existing set of that name.
fn attach_ipset(group: Group, config: &GroupConfig) -> Result<Group, ConfigError> {
    let Some(set) = config.ipset.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(group);
    };
    let ipset = IpSet::create(set, config.ipset_ttl).map_err(|source| ConfigError::IpSet {
        name: set.to_string(),
        source,
    })?;
    Ok(group.with_ipset(Arc::new(ipset)))
}

/// `host[:port][/tcp]`, port 53 by default.
fn parse_dns_addr(entry: &str) -> Option<(String, Network)> {
    let entry = entry.trim();
    let (host, network) = match entry.strip_suffix("/tcp") {
        Some(host) => (host, Network::Tcp),
        None => (entry, Network::Udp),
    };
    if host.is_empty() {
        return None;
    }
    Some((with_default_port(host, DNS_PORT), network))
}

/// `host[:port]@server_name`, port 853 by default.
fn parse_dot_addr(entry: &str) -> Option<(String, String)> {
    let (host, server_name) = entry.trim().split_once('@')?;
    if host.is_empty() || server_name.is_empty() || server_name.contains('@') {
        return None;
    }
    Some((with_default_port(host, DOT_PORT), server_name.to_string()))
}

fn with_default_port(host: &str, port: u16) -> String {
    if host.parse::<SocketAddr>().is_ok() {
        return host.to_string();
    }
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    match host.rsplit_once(':') {
        Some((_, p)) if p.parse::<u16>().is_ok() => host.to_string(),
        _ => format!("{host}:{port}"),
    }
}

fn is_host_port(addr: &str) -> bool {
    addr.rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
}
