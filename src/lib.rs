//! Crossroad - a rule-driven DNS forwarder.
//!
//! Queries are answered from static hosts entries or the cache when
//! possible, otherwise routed to one of several named upstream groups chosen
//! by deny-list and per-group domain rules. Addresses resolved through a
//! group can be pushed into an ipset for transparent redirection.

pub mod cache;
pub mod cnip;
pub mod config;
pub mod dns;
pub mod error;
pub mod firewall;
pub mod group;
pub mod handler;
pub mod hosts;
pub mod matcher;
pub mod outbound;
pub mod server;
pub mod socks5;
pub mod stats;
pub mod transport;
