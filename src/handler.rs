//! Per-query dispatch.
//!
//! Handles the query pipeline:
//! 1. Static hosts overrides
//! 2. Cache lookup
//! 3. Group selection (deny-list, group rules, fallback)
//! 4. Group resolution, with the CN-IP check on the fallback path
//! 5. Cache store and firewall-set publication
//!
//! Transports handle the I/O; the handler makes every decision. A handler is
//! immutable once built and is replaced as a whole on reload.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{DnsCache, QueryKey};
use crate::cnip::CnIpSet;
use crate::dns::{DnsQuery, DnsResponse};
use crate::error::{ConfigError, ResolveError};
use crate::group::{CLEAN, DIRTY, Group};
use crate::hosts::HostsReader;
use crate::matcher::Matcher;

/// How a query was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Hosts,
    Cached,
    Resolved(String),
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Hosts => f.write_str("HOSTS"),
            Outcome::Cached => f.write_str("CACHED"),
            Outcome::Resolved(group) => write!(f, "RESOLVED group={group}"),
            Outcome::Failed => f.write_str("FAILED"),
        }
    }
}

/// Response to send back plus how it was produced.
#[derive(Debug)]
pub struct Reply {
    pub domain: String,
    pub qtype: u16,
    pub response: Vec<u8>,
    pub outcome: Outcome,
}

pub struct Handler {
    hosts: Vec<Arc<HostsReader>>,
    cache: DnsCache,
    gfwlist: Matcher,
    cnip: CnIpSet,
    /// Declaration order; the order group rules are evaluated in.
    groups: Vec<Group>,
    clean: usize,
    dirty: usize,
    reroute_foreign: bool,
}

impl Handler {
    /// Build a handler over `groups`, which must contain non-empty `clean`
    /// and `dirty` groups.
    pub fn new(groups: Vec<Group>) -> Result<Self, ConfigError> {
        let clean = mandatory_group(&groups, CLEAN)?;
        let dirty = mandatory_group(&groups, DIRTY)?;

        Ok(Self {
            hosts: Vec::new(),
            cache: DnsCache::new(0, Duration::ZERO, Duration::ZERO),
            gfwlist: Matcher::default(),
            cnip: CnIpSet::default(),
            groups,
            clean,
            dirty,
            reroute_foreign: false,
        })
    }

    /// Check that the mandatory groups exist and have callers.
    pub fn check_groups(groups: &[Group]) -> Result<(), ConfigError> {
        mandatory_group(groups, CLEAN)?;
        mandatory_group(groups, DIRTY)?;
        Ok(())
    }

    pub fn with_hosts(mut self, hosts: Vec<Arc<HostsReader>>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_cache(mut self, cache: DnsCache) -> Self {
        self.cache = cache;
        self
    }

    /// Deny-list whose matches always go to the `dirty` group.
    pub fn with_gfwlist(mut self, gfwlist: Matcher) -> Self {
        self.gfwlist = gfwlist;
        self
    }

    pub fn with_cnip(mut self, cnip: CnIpSet) -> Self {
        self.cnip = cnip;
        self
    }

    /// Re-resolve fallback answers with no domestic address through `dirty`.
    pub fn reroute_foreign(mut self, reroute: bool) -> Self {
        self.reroute_foreign = reroute;
        self
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn gfwlist_len(&self) -> usize {
        self.gfwlist.len()
    }

    /// Run the full pipeline for one raw query.
    ///
    /// Returns `None` for packets that are not a parsable query; those are
    /// dropped without a reply.
    pub async fn handle(&self, packet: &[u8]) -> Option<Reply> {
        let query = DnsQuery::parse(packet)?;

        let (response, outcome) = self.dispatch(&query, packet).await;
        Some(Reply {
            domain: query.domain,
            qtype: query.qtype,
            response,
            outcome,
        })
    }

    async fn dispatch(&self, query: &DnsQuery, packet: &[u8]) -> (Vec<u8>, Outcome) {
        if let Some(addr) = self.lookup_hosts(query) {
            return (query.hosts_response(addr), Outcome::Hosts);
        }

        let key = QueryKey::from(query);
        if let Some(cached) = self.cache.get(&key).and_then(|c| query.response_from_cache(&c)) {
            return (cached, Outcome::Cached);
        }

        match self.resolve(query, packet).await {
            Ok((group, response)) => {
                self.cache.set(key, &response);
                group.publish(&response);
                (response, Outcome::Resolved(group.name().to_string()))
            }
            Err(err) => {
                debug!(domain = %query.domain, "resolve failed: {err}");
                (query.servfail_response(), Outcome::Failed)
            }
        }
    }

    fn lookup_hosts(&self, query: &DnsQuery) -> Option<IpAddr> {
        self.hosts
            .iter()
            .find_map(|hosts| hosts.lookup(&query.domain, query.qtype))
    }

    /// Group explicitly claiming `domain`, or `None` to fall back to `clean`.
    fn select(&self, domain: &str) -> Option<&Group> {
        if self.gfwlist.matches(domain) {
            return Some(&self.groups[self.dirty]);
        }
        self.groups.iter().find(|group| group.matches(domain))
    }

    async fn resolve(
        &self,
        query: &DnsQuery,
        packet: &[u8],
    ) -> Result<(&Group, Vec<u8>), ResolveError> {
        if let Some(group) = self.select(&query.domain) {
            let response = group.resolve(packet).await?;
            return Ok((group, response));
        }

        let clean = &self.groups[self.clean];
        let response = clean.resolve(packet).await?;
        if self.cnip.is_empty() {
            return Ok((clean, response));
        }

        let addrs = DnsResponse::ipv4_answers(&response);
        if addrs.is_empty() {
            return Ok((clean, response));
        }
        let domestic = addrs.iter().any(|addr| self.cnip.contains(*addr));
        debug!(domain = %query.domain, domestic, "classified fallback answer");
        if domestic || !self.reroute_foreign {
            return Ok((clean, response));
        }

        let dirty = &self.groups[self.dirty];
        match dirty.resolve(packet).await {
            Ok(rerouted) => Ok((dirty, rerouted)),
            Err(err) => {
                debug!(domain = %query.domain, "reroute failed, keeping clean answer: {err}");
                Ok((clean, response))
            }
        }
    }
}

fn mandatory_group(groups: &[Group], name: &'static str) -> Result<usize, ConfigError> {
    let index = groups
        .iter()
        .position(|group| group.name() == name)
        .ok_or(ConfigError::MissingGroup(name))?;
    if groups[index].callers().is_empty() {
        return Err(ConfigError::EmptyGroup(name.to_string()));
    }
    Ok(index)
}
