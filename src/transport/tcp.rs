//! TCP transport for DNS queries.
//!
//! Each client connection is handled independently. Messages carry a 2-byte
//! length prefix, and a connection may send several queries one after the
//! other; each is answered before the next is read.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use super::{Protocol, Service};

/// Idle connections are closed after this long without a new query.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP listener.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawn an accept loop that handles each connection in a separate task.
    pub fn start(self, service: Arc<Service>) {
        tokio::spawn(run_accept_loop(self.listener, service));
    }
}

async fn run_accept_loop(listener: TcpListener, service: Arc<Service>) {
    loop {
        match listener.accept().await {
            Ok((client, _)) => {
                tokio::spawn(handle_connection(client, Arc::clone(&service)));
            }
            Err(e) => {
                warn!("TCP accept error: {e}");
            }
        }
    }
}

async fn handle_connection(mut client: TcpStream, service: Arc<Service>) {
    loop {
        let query = match tokio::time::timeout(IDLE_TIMEOUT, read_dns_message(&mut client)).await {
            Ok(Some(query)) => query,
            Ok(None) | Err(_) => return,
        };

        let Some(response) = service.serve(Protocol::Tcp, &query).await else {
            return;
        };

        if let Err(e) = write_dns_message(&mut client, &response).await {
            debug!("TCP response error: {e}");
            return;
        }
    }
}

/// Read one length-prefixed message, without its prefix.
async fn read_dns_message(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let len = stream.read_u16().await.ok()? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.ok()?;
    Some(buf)
}

async fn write_dns_message(stream: &mut TcpStream, message: &[u8]) -> io::Result<()> {
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "response too large"))?;
    let mut framed = Vec::with_capacity(2 + message.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    stream.write_all(&framed).await
}
