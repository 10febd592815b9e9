//! Static hosts overrides.
//!
//! A [`HostsReader`] holds one hosts table, either parsed from inline text or
//! loaded from a file that can be re-read on a timer. Reloads build a complete
//! table and publish it atomically.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::dns::{TYPE_A, TYPE_AAAA};

#[derive(Debug, Default)]
struct HostsTable {
    v4: FxHashMap<String, IpAddr>,
    v6: FxHashMap<String, IpAddr>,
}

impl HostsTable {
    /// Parse `<ip> <name> [<alias>...]` lines; the first entry for a name wins.
    fn parse(text: &str) -> Self {
        let mut table = Self::default();

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default();
            let mut fields = line.split_whitespace();
            let Some(addr) = fields.next() else {
                continue;
            };
            let Ok(addr) = addr.parse::<IpAddr>() else {
                continue;
            };
            let map = if addr.is_ipv4() {
                &mut table.v4
            } else {
                &mut table.v6
            };
            for name in fields {
                map.entry(normalize(name)).or_insert(addr);
            }
        }

        table
    }

    fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

/// One source of static name-to-address mappings.
pub struct HostsReader {
    table: ArcSwap<HostsTable>,
    path: Option<PathBuf>,
}

impl HostsReader {
    pub fn from_text(text: &str) -> Self {
        Self {
            table: ArcSwap::from_pointee(HostsTable::parse(text)),
            path: None,
        }
    }

    /// Load a hosts file. With a non-zero `reload` interval a background task
    /// re-reads the file on every tick; it must be called inside a runtime.
    pub fn from_file(path: impl AsRef<Path>, reload: Duration) -> std::io::Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path)?;
        let reader = Arc::new(Self {
            table: ArcSwap::from_pointee(HostsTable::parse(&text)),
            path: Some(path),
        });

        if !reload.is_zero() {
            let weak = Arc::downgrade(&reader);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reload);
                interval.tick().await; // Skip first immediate tick
                loop {
                    interval.tick().await;
                    let Some(reader) = weak.upgrade() else {
                        return;
                    };
                    reader.reload().await;
                }
            });
        }

        Ok(reader)
    }

    /// Re-read the backing file; the previous table is kept on failure.
    pub async fn reload(&self) {
        let Some(path) = &self.path else {
            return;
        };
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let table = HostsTable::parse(&text);
                debug!(path = %path.display(), entries = table.len(), "reloaded hosts");
                self.table.store(Arc::new(table));
            }
            Err(err) => warn!(path = %path.display(), "read hosts error: {err}"),
        }
    }

    /// Static address for an exact name, for A and AAAA queries only.
    pub fn lookup(&self, name: &str, qtype: u16) -> Option<IpAddr> {
        let table = self.table.load();
        let map = match qtype {
            TYPE_A => &table.v4,
            TYPE_AAAA => &table.v6,
            _ => return None,
        };
        map.get(&normalize(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
