//! DNS response cache with TTL-based expiration.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::dns::{DnsQuery, DnsResponse};

/// Normalized cache key: lowercase domain without trailing dot, type, class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl QueryKey {
    pub fn new(domain: &str, qtype: u16, qclass: u16) -> Self {
        Self {
            domain: domain.trim_end_matches('.').to_lowercase(),
            qtype,
            qclass,
        }
    }
}

impl From<&DnsQuery> for QueryKey {
    fn from(query: &DnsQuery) -> Self {
        Self::new(&query.domain, query.qtype, query.qclass)
    }
}

struct CacheEntry {
    response: Vec<u8>,
    expires_at: Instant,
    /// Insertion sequence, used to tell live entries from stale queue slots.
    seq: u64,
}

#[derive(Default)]
struct Entries {
    map: FxHashMap<QueryKey, CacheEntry>,
    /// Insertion order; a key may appear more than once after overwrites.
    order: VecDeque<(QueryKey, u64)>,
    next_seq: u64,
}

impl Entries {
    /// Reclaim the oldest live entry, returning false when nothing is left.
    fn evict_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.map.get(&key).is_some_and(|e| e.seq == seq) {
                self.map.remove(&key);
                return true;
            }
        }
        false
    }
}

/// TTL-clamped, size-bounded DNS cache.
///
/// Reads take a shared lock; expired entries are skipped on lookup and only
/// reclaimed when they reach the front of the eviction queue.
pub struct DnsCache {
    entries: RwLock<Entries>,
    size: usize,
    min_ttl: Duration,
    max_ttl: Duration,
}

impl DnsCache {
    /// Create a cache holding at most `size` entries; `size <= 0` disables it.
    pub fn new(size: i64, min_ttl: Duration, max_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            size: usize::try_from(size).unwrap_or(0),
            min_ttl,
            max_ttl: max_ttl.max(min_ttl),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.size > 0
    }

    /// Look up a live cached response.
    pub fn get(&self, key: &QueryKey) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            return None;
        }

        let entries = self.entries.read().ok()?;
        let entry = entries.map.get(key)?;
        if Instant::now() < entry.expires_at {
            Some(entry.response.clone())
        } else {
            None
        }
    }

    /// Store a response, overwriting any previous entry for `key`.
    pub fn set(&self, key: QueryKey, response: &[u8]) {
        if !self.is_enabled() {
            return;
        }

        let ttl = self.clamp_ttl(DnsResponse::answer_min_ttl(response, self.min_ttl));
        let expires_at = Instant::now() + ttl;

        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        if !entries.map.contains_key(&key) {
            while entries.map.len() >= self.size {
                if !entries.evict_oldest() {
                    break;
                }
            }
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.order.push_back((key.clone(), seq));
        entries.map.insert(
            key,
            CacheEntry {
                response: response.to_vec(),
                expires_at,
                seq,
            },
        );

        // Bound the queue when the same keys are overwritten repeatedly
        if entries.order.len() > self.size.saturating_mul(2) {
            let map = &entries.map;
            let live: VecDeque<_> = entries
                .order
                .iter()
                .filter(|(k, s)| map.get(k).is_some_and(|e| e.seq == *s))
                .cloned()
                .collect();
            entries.order = live;
        }
    }

    /// Clamp an origin TTL into the configured window.
    pub fn clamp_ttl(&self, ttl: Duration) -> Duration {
        ttl.clamp(self.min_ttl, self.max_ttl)
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
