//! IPv4 CIDR membership set.
//!
//! Built once from a CIDR list (the CN-IP list) and queried read-only: the
//! networks are merged into sorted, disjoint ranges and looked up by binary
//! search.

use std::net::Ipv4Addr;
use std::path::Path;

use ipnetwork::Ipv4Network;
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Sorted, non-overlapping inclusive IPv4 ranges.
#[derive(Debug, Default, Clone)]
pub struct CnIpSet {
    ranges: Vec<(u32, u32)>,
}

impl CnIpSet {
    /// Parse one network per line; blank lines and `#` comments are skipped,
    /// unparsable lines are logged and skipped.
    pub fn from_text(text: &str) -> Self {
        let networks = text.lines().filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match line.parse::<Ipv4Network>() {
                Ok(network) => Some(network),
                Err(err) => {
                    warn!(line, "skipping invalid cidr: {err}");
                    None
                }
            }
        });
        Self::from_networks(networks)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let set = Self::from_text(&text);
        debug!(path = %path.display(), ranges = set.ranges.len(), "loaded cnip list");
        Ok(set)
    }

    pub fn from_networks(networks: impl IntoIterator<Item = Ipv4Network>) -> Self {
        let mut ranges: Vec<(u32, u32)> = networks
            .into_iter()
            .map(|n| (u32::from(n.network()), u32::from(n.broadcast())))
            .collect();
        ranges.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        Self { ranges: merged }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let ip = u32::from(addr);
        // Index of the first range starting after `ip`
        let idx = self.ranges.partition_point(|&(start, _)| start <= ip);
        idx > 0 && ip <= self.ranges[idx - 1].1
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_addresses_inside_networks() {
        let set = CnIpSet::from_text("1.0.1.0/24\n114.114.0.0/16\n");

        assert!(set.contains(Ipv4Addr::new(1, 0, 1, 0)));
        assert!(set.contains(Ipv4Addr::new(1, 0, 1, 255)));
        assert!(set.contains(Ipv4Addr::new(114, 114, 114, 114)));
        assert!(!set.contains(Ipv4Addr::new(1, 0, 2, 0)));
        assert!(!set.contains(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!set.contains(Ipv4Addr::new(0, 0, 0, 0)));
    }

    #[test]
    fn bare_address_is_a_host_network() {
        let set = CnIpSet::from_text("223.5.5.5");

        assert!(set.contains(Ipv4Addr::new(223, 5, 5, 5)));
        assert!(!set.contains(Ipv4Addr::new(223, 5, 5, 6)));
    }

    #[test]
    fn overlapping_and_adjacent_networks_merge() {
        let set = CnIpSet::from_text("10.0.0.0/24\n10.0.1.0/24\n10.0.0.128/25\n");

        assert_eq!(set.ranges.len(), 1);
        assert!(set.contains(Ipv4Addr::new(10, 0, 1, 200)));
    }

    #[test]
    fn invalid_lines_are_skipped() {
        let set = CnIpSet::from_text("# comment\nnot-a-cidr\n\n192.168.0.0/16\n");

        assert!(set.contains(Ipv4Addr::new(192, 168, 3, 4)));
    }

    #[test]
    fn full_range_includes_broadcast() {
        let set = CnIpSet::from_text("0.0.0.0/0");

        assert!(set.contains(Ipv4Addr::new(255, 255, 255, 255)));
    }

    #[test]
    fn empty_set_contains_nothing() {
        assert!(!CnIpSet::default().contains(Ipv4Addr::new(1, 1, 1, 1)));
    }
}
