//! Firewall address-set publication.
//!
//! Routing groups can republish the IPv4 addresses they resolve into a named
//! kernel address set, so packet-filter rules can redirect traffic to those
//! hosts. The set is a write-only sink.

use std::net::Ipv4Addr;
use std::process::Command;

use futures::future::BoxFuture;
use tracing::info;

use crate::error::FirewallError;

/// Write-only sink for resolved addresses.
pub trait AddressSet: Send + Sync {
    /// Insert one address, refreshing its timeout if already present.
    fn add(&self, addr: Ipv4Addr) -> BoxFuture<'_, Result<(), FirewallError>>;

    /// Set name, for logging.
    fn name(&self) -> &str;
}

/// A `hash:ip` set managed through the `ipset` binary.
#[derive(Debug, Clone)]
pub struct IpSet {
    name: String,
    /// Per-entry timeout in seconds; 0 means entries never expire.
    timeout: u32,
}

impl IpSet {
    /// Create (or replace) the set.
    ///
    /// An existing set of the same name is kept but flushed, so stale
    /// entries from a previous run are dropped.
    pub fn create(name: impl Into<String>, timeout: u32) -> Result<Self, FirewallError> {
        let set = Self {
            name: name.into(),
            timeout,
        };

        let timeout = set.timeout.to_string();
        let mut args = vec!["create", set.name.as_str(), "hash:ip"];
        if set.timeout > 0 {
            args.extend(["timeout", timeout.as_str()]);
        }
        args.push("-exist");
        run_ipset(&args)?;
        run_ipset(&["flush", &set.name])?;

        info!(name = %set.name, timeout = set.timeout, "created ipset");
        Ok(set)
    }

    fn add_args(&self, addr: Ipv4Addr) -> Vec<String> {
        let mut args = vec!["add".to_string(), self.name.clone(), addr.to_string()];
        if self.timeout > 0 {
            args.push("timeout".to_string());
            args.push(self.timeout.to_string());
        }
        args.push("-exist".to_string());
        args
    }
}

impl AddressSet for IpSet {
    fn add(&self, addr: Ipv4Addr) -> BoxFuture<'_, Result<(), FirewallError>> {
        Box::pin(async move {
            let args = self.add_args(addr);
            let output = tokio::process::Command::new("ipset")
                .args(&args)
                .output()
                .await?;

            if !output.status.success() {
                return Err(FirewallError::Command {
                    args: args.join(" "),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(())
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn run_ipset(args: &[&str]) -> Result<(), FirewallError> {
    let output = Command::new("ipset").args(args).output()?;

    if !output.status.success() {
        return Err(FirewallError::Command {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
