//! Inbound transports.
//!
//! Provides UDP and TCP listeners that receive queries from clients and hand
//! each one to the shared [`Service`] on its own task.

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::handler::Handler;
use crate::stats::Stats;

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// State shared by every transport task: the current handler snapshot and
/// the running counters.
pub struct Service {
    handler: ArcSwap<Handler>,
    stats: Stats,
    started: Instant,
}

impl Service {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler: ArcSwap::from_pointee(handler),
            stats: Stats::new(),
            started: Instant::now(),
        }
    }

    /// The handler new queries are dispatched to.
    pub fn handler(&self) -> Arc<Handler> {
        self.handler.load_full()
    }

    /// Publish a new handler. Queries already running keep their snapshot.
    pub fn replace(&self, handler: Handler) {
        self.handler.store(Arc::new(handler));
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Answer one raw query, or `None` when the packet should be dropped.
    pub async fn serve(&self, protocol: Protocol, packet: &[u8]) -> Option<Vec<u8>> {
        let start = Instant::now();
        let handler = self.handler.load_full();

        let Some(reply) = handler.handle(packet).await else {
            debug!(protocol = protocol.as_str(), len = packet.len(), "dropped malformed query");
            return None;
        };

        let elapsed = start.elapsed();
        self.stats.record(&reply.outcome, elapsed);
        debug!(
            protocol = protocol.as_str(),
            domain = %reply.domain,
            qtype = reply.qtype,
            total_ms = elapsed.as_secs_f64() * 1000.0,
            "{}",
            reply.outcome
        );

        Some(reply.response)
    }
}
