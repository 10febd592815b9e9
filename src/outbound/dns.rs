//! Plain DNS over UDP or TCP.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tracing::debug;

use super::exchange_framed;
use crate::dns::{is_truncated, message_id};
use crate::error::CallError;
use crate::socks5::Socks5Dialer;

/// Largest UDP payload; EDNS answers may exceed the classic 512 bytes and
/// anything cut short would still parse as a valid header.
const MAX_UDP_RESPONSE_SIZE: usize = 65535;

/// Transport used by a [`DnsCaller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Udp,
    Tcp,
}

/// Plain DNS upstream.
///
/// SOCKS5 offers no usable UDP path here, so a UDP caller with a dialer
/// sends its queries over TCP through the proxy.
pub struct DnsCaller {
    addr: String,
    network: Network,
    dialer: Option<Socks5Dialer>,
    pub(super) timeout: Duration,
}

impl DnsCaller {
    pub fn new(
        addr: impl Into<String>,
        network: Network,
        dialer: Option<Socks5Dialer>,
        timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            network,
            dialer,
            timeout,
        }
    }

    pub(super) async fn call(&self, query: &[u8]) -> Result<Vec<u8>, CallError> {
        if self.network == Network::Tcp || self.dialer.is_some() {
            return self.call_tcp(query).await;
        }

        let response = self.call_udp(query).await?;
        if is_truncated(&response) {
            debug!(upstream = %self.addr, "truncated udp response, retrying over tcp");
            return self.call_tcp(query).await;
        }
        Ok(response)
    }

    async fn call_udp(&self, query: &[u8]) -> Result<Vec<u8>, CallError> {
        let target = resolve(&self.addr).await?;
        let bind = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        socket.send(query).await?;

        let id = message_id(query);
        let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            // Stray datagrams for other transactions are dropped
            if message_id(&buf[..len]) == id {
                buf.truncate(len);
                return Ok(buf);
            }
        }
    }

    async fn call_tcp(&self, query: &[u8]) -> Result<Vec<u8>, CallError> {
        let mut stream = match &self.dialer {
            Some(dialer) => dialer.connect(&self.addr).await?,
            None => TcpStream::connect(self.addr.as_str()).await?,
        };
        exchange_framed(&mut stream, query).await
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, CallError> {
    lookup_host(addr).await?.next().ok_or_else(|| {
        CallError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {addr}"),
        ))
    })
}

impl fmt::Display for DnsCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.network {
            Network::Udp => "udp",
            Network::Tcp => "tcp",
        };
        write!(f, "{scheme}://{}", self.addr)?;
        if let Some(dialer) = &self.dialer {
            write!(f, " via socks5://{}", dialer.proxy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::{build_query, build_response};
    use crate::dns::{DnsResponse, TYPE_A};
    use crate::outbound::Caller;
    use crate::outbound::tests::spawn_tcp_upstream;

    fn caller(addr: String, network: Network, dialer: Option<Socks5Dialer>) -> Caller {
        Caller::Dns(DnsCaller::new(addr, network, dialer, Duration::from_secs(2)))
    }

    #[tokio::test]
    async fn tcp_caller_resolves() {
        let upstream = spawn_tcp_upstream(Ipv4Addr::new(4, 3, 2, 1)).await;

        let response = caller(upstream.to_string(), Network::Tcp, None)
            .call(&build_query(5, "example.com", TYPE_A))
            .await
            .unwrap();

        assert_eq!(
            DnsResponse::ipv4_answers(&response),
            vec![Ipv4Addr::new(4, 3, 2, 1)]
        );
    }

    #[tokio::test]
    async fn udp_truncation_falls_back_to_tcp() {
        // Same port for both transports: UDP answers truncated, TCP answers fully
        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = tcp.local_addr().unwrap().port();
        let udp = UdpSocket::bind(("127.0.0.1", port)).await.unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, src) = udp.recv_from(&mut buf).await.unwrap();
            let mut response = build_response(&buf[..len], 300, &[]);
            response[2] |= 0x02; // TC
            udp.send_to(&response, src).await.unwrap();
        });
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut stream, _) = tcp.accept().await.unwrap();
            let len = stream.read_u16().await.unwrap();
            let mut query = vec![0u8; len as usize];
            stream.read_exact(&mut query).await.unwrap();
            let response = build_response(&query, 300, &[Ipv4Addr::new(7, 7, 7, 7)]);
            stream.write_u16(response.len() as u16).await.unwrap();
            stream.write_all(&response).await.unwrap();
        });

        let response = caller(format!("127.0.0.1:{port}"), Network::Udp, None)
            .call(&build_query(6, "example.com", TYPE_A))
            .await
            .unwrap();

        assert!(!is_truncated(&response));
        assert_eq!(
            DnsResponse::ipv4_answers(&response),
            vec![Ipv4Addr::new(7, 7, 7, 7)]
        );
    }

    #[tokio::test]
    async fn large_udp_response_is_not_cut_short() {
        let addrs: Vec<_> = (0..400u16)
            .map(|i| Ipv4Addr::new(10, 0, (i >> 8) as u8, i as u8))
            .collect();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream = udp.local_addr().unwrap();
        let answers = addrs.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, src) = udp.recv_from(&mut buf).await.unwrap();
            let response = build_response(&buf[..len], 300, &answers);
            udp.send_to(&response, src).await.unwrap();
        });

        let response = caller(upstream.to_string(), Network::Udp, None)
            .call(&build_query(7, "example.com", TYPE_A))
            .await
            .unwrap();

        assert!(response.len() > 4096);
        assert_eq!(DnsResponse::ipv4_answers(&response), addrs);
    }

    #[tokio::test]
    async fn dialer_tunnels_udp_caller_over_tcp() {
        let upstream = spawn_tcp_upstream(Ipv4Addr::new(8, 8, 4, 4)).await;
        let proxy = crate::socks5::tests::spawn_proxy().await;
        let dialer = Socks5Dialer::new(proxy.to_string());

        let response = caller(upstream.to_string(), Network::Udp, Some(dialer))
            .call(&build_query(8, "example.com", TYPE_A))
            .await
            .unwrap();

        assert_eq!(
            DnsResponse::ipv4_answers(&response),
            vec![Ipv4Addr::new(8, 8, 4, 4)]
        );
    }

    #[tokio::test]
    async fn connection_refused_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = caller(addr.to_string(), Network::Tcp, None)
            .call(&build_query(9, "example.com", TYPE_A))
            .await;

        assert!(result.is_err());
    }
}
