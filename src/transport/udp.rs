//! UDP transport for DNS queries.
//!
//! Every datagram is answered on its own task, so a slow upstream never holds
//! up the receive loop or other clients.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::warn;

use super::{MAX_DNS_PACKET_SIZE, Protocol, Service};
use crate::dns::HEADER_LEN;

/// UDP listener.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawn the receive loop.
    pub fn start(self, service: Arc<Service>) {
        tokio::spawn(run(self.socket, service));
    }
}

async fn run(socket: Arc<UdpSocket>, service: Arc<Service>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("UDP recv error: {e}");
                continue;
            }
        };

        if len < HEADER_LEN {
            continue;
        }

        let packet = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let Some(response) = service.serve(Protocol::Udp, &packet).await else {
                return;
            };
            if let Err(e) = socket.send_to(&response, src).await {
                warn!(%src, "UDP response error: {e}");
            }
        });
    }
}
