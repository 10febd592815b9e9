//! Routing groups.
//!
//! A group is one resolution policy: an ordered set of upstream callers, an
//! optional domain matcher that claims queries for it, an optional firewall
//! address set fed with its answers, and a call strategy.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, warn};

use crate::dns::DnsResponse;
use crate::error::{CallError, ResolveError};
use crate::firewall::AddressSet;
use crate::matcher::Matcher;
use crate::outbound::Caller;

/// Conventional name of the fallback group.
pub const CLEAN: &str = "clean";
/// Conventional name of the circumvention group.
pub const DIRTY: &str = "dirty";

pub struct Group {
    name: String,
    callers: Vec<Caller>,
    matcher: Option<Matcher>,
    ipset: Option<Arc<dyn AddressSet>>,
    concurrent: bool,
}

impl Group {
    pub fn new(name: impl Into<String>, callers: Vec<Caller>) -> Self {
        Self {
            name: name.into(),
            callers,
            matcher: None,
            ipset: None,
            concurrent: false,
        }
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_ipset(mut self, ipset: Arc<dyn AddressSet>) -> Self {
        self.ipset = Some(ipset);
        self
    }

    /// Race all callers instead of trying them in order.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callers(&self) -> &[Caller] {
        &self.callers
    }

    /// Whether this group's own rules claim `domain`.
    pub fn matches(&self, domain: &str) -> bool {
        self.matcher.as_ref().is_some_and(|m| m.matches(domain))
    }

    /// Resolve a query through this group's callers.
    pub async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>, ResolveError> {
        if self.callers.is_empty() {
            return Err(ResolveError::NoCallers);
        }
        if self.concurrent && self.callers.len() > 1 {
            self.resolve_concurrent(query).await
        } else {
            self.resolve_sequential(query).await
        }
    }

    /// First success in configured order; the last error if all fail.
    async fn resolve_sequential(&self, query: &[u8]) -> Result<Vec<u8>, ResolveError> {
        let mut last_error = None;

        for caller in &self.callers {
            match caller.call(query).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    debug!(group = %self.name, upstream = %caller, "call failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(ResolveError::Exhausted(err)),
            None => Err(ResolveError::NoCallers),
        }
    }

    /// First success among all callers started at once.
    ///
    /// Returning drops the remaining in-flight calls; they own no shared
    /// state, so an abandoned call has no visible effect.
    async fn resolve_concurrent(&self, query: &[u8]) -> Result<Vec<u8>, ResolveError> {
        let mut in_flight: FuturesUnordered<_> = self
            .callers
            .iter()
            .map(|caller| async move { (caller, caller.call(query).await) })
            .collect();

        let mut errors: Vec<CallError> = Vec::with_capacity(self.callers.len());
        while let Some((caller, result)) = in_flight.next().await {
            match result {
                Ok(response) => {
                    debug!(group = %self.name, upstream = %caller, "won race");
                    return Ok(response);
                }
                Err(err) => {
                    debug!(group = %self.name, upstream = %caller, "call failed: {err}");
                    errors.push(err);
                }
            }
        }

        Err(ResolveError::AllFailed(errors))
    }

    /// Push the answer's IPv4 addresses into the group's address set.
    ///
    /// Fire-and-forget: insertion runs on its own task and failures are only
    /// logged. Must be called inside a runtime.
    pub fn publish(&self, response: &[u8]) {
        let Some(ipset) = &self.ipset else {
            return;
        };
        let addrs = DnsResponse::ipv4_answers(response);
        if addrs.is_empty() {
            return;
        }

        let ipset = Arc::clone(ipset);
        tokio::spawn(async move {
            for addr in addrs {
                if let Err(err) = ipset.add(addr).await {
                    warn!(ipset = ipset.name(), %addr, "add to ipset failed: {err}");
                }
            }
        });
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("callers", &self.callers)
            .field("rules", &self.matcher.as_ref().map_or(0, Matcher::len))
            .field("ipset", &self.ipset.as_ref().map(|s| s.name().to_string()))
            .field("concurrent", &self.concurrent)
            .finish()
    }
}
