//! Minimal SOCKS5 client for dialing upstream TCP connections.
//!
//! Only the no-authentication method and the CONNECT command are used.

use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::CallError;

const SOCKS5_VERSION: u8 = 0x05;
const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;

const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
const SOCKS5_ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;

/// Dials TCP connections through a SOCKS5 proxy.
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: String,
}

impl Socks5Dialer {
    pub fn new(proxy: impl Into<String>) -> Self {
        Self {
            proxy: proxy.into(),
        }
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    /// Open a stream to `target` (`host:port`) tunneled through the proxy.
    pub async fn connect(&self, target: &str) -> Result<TcpStream, CallError> {
        let request = connect_request(target)?;
        let mut stream = TcpStream::connect(self.proxy.as_str()).await?;

        // 1. Handshake
        stream
            .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE])
            .await?;
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        trace!(proxy = %self.proxy, ?reply, "socks5 handshake response");
        if reply != [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE] {
            return Err(CallError::Socks5(format!(
                "proxy rejected no-auth method: {reply:?}"
            )));
        }

        // 2. Send request header
        stream.write_all(&request).await?;
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        if header[0] != SOCKS5_VERSION {
            return Err(CallError::Socks5(format!(
                "unexpected version {}",
                header[0]
            )));
        }
        if header[1] != SOCKS5_REPLY_SUCCEEDED {
            return Err(CallError::Socks5(format!(
                "connect to {target} failed with reply {}",
                header[1]
            )));
        }

        // Drain the bound address, which is of no use to us
        let addr_len = match header[3] {
            SOCKS5_ADDR_TYPE_IPV4 => 4,
            SOCKS5_ADDR_TYPE_IPV6 => 16,
            SOCKS5_ADDR_TYPE_DOMAIN_NAME => stream.read_u8().await? as usize,
            other => {
                return Err(CallError::Socks5(format!("unknown address type {other}")));
            }
        };
        let mut bound = vec![0u8; addr_len + 2];
        stream.read_exact(&mut bound).await?;

        Ok(stream)
    }
}

/// Encode a CONNECT request for `host:port`.
fn connect_request(target: &str) -> Result<Vec<u8>, CallError> {
    let mut buf = vec![SOCKS5_VERSION, SOCKS5_CMD_TCP_CONNECT, 0x00];

    if let Ok(addr) = target.parse::<SocketAddr>() {
        match addr.ip() {
            IpAddr::V4(v4) => {
                buf.push(SOCKS5_ADDR_TYPE_IPV4);
                buf.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                buf.push(SOCKS5_ADDR_TYPE_IPV6);
                buf.extend_from_slice(&v6.octets());
            }
        }
        buf.extend_from_slice(&addr.port().to_be_bytes());
        return Ok(buf);
    }

    let invalid = || {
        CallError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid target address {target:?}"),
        ))
    };
    let (host, port) = target.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    if host.is_empty() || host.len() > 255 {
        return Err(invalid());
    }

    buf.push(SOCKS5_ADDR_TYPE_DOMAIN_NAME);
    buf.push(host.len() as u8);
    buf.extend_from_slice(host.as_bytes());
    buf.extend_from_slice(&port.to_be_bytes());
    Ok(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A one-shot SOCKS5 proxy that accepts a CONNECT and splices the stream
    /// to the requested IPv4 target.
    pub(crate) async fn spawn_proxy() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (mut client, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut greeting = [0u8; 3];
                    client.read_exact(&mut greeting).await.unwrap();
                    client.write_all(&[5, 0]).await.unwrap();

                    let mut head = [0u8; 4];
                    client.read_exact(&mut head).await.unwrap();
                    assert_eq!(head[3], SOCKS5_ADDR_TYPE_IPV4);
                    let mut target = [0u8; 6];
                    client.read_exact(&mut target).await.unwrap();
                    let ip = std::net::Ipv4Addr::new(target[0], target[1], target[2], target[3]);
                    let port = u16::from_be_bytes([target[4], target[5]]);

                    let mut upstream = TcpStream::connect((ip, port)).await.unwrap();
                    client
                        .write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0])
                        .await
                        .unwrap();
                    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                });
            }
        });

        addr
    }

    #[test]
    fn connect_request_ipv4() {
        let request = connect_request("1.2.3.4:853").unwrap();

        assert_eq!(request, vec![5, 1, 0, 1, 1, 2, 3, 4, 0x03, 0x55]);
    }

    #[test]
    fn connect_request_ipv6() {
        let request = connect_request("[::1]:53").unwrap();

        assert_eq!(request[3], SOCKS5_ADDR_TYPE_IPV6);
        assert_eq!(request.len(), 4 + 16 + 2);
    }

    #[test]
    fn connect_request_domain() {
        let request = connect_request("dns.google:853").unwrap();

        assert_eq!(&request[..5], &[5, 1, 0, 3, 10]);
        assert_eq!(&request[5..15], b"dns.google");
        assert_eq!(&request[15..], &853u16.to_be_bytes());
    }

    #[test]
    fn connect_request_rejects_missing_port() {
        assert!(connect_request("dns.google").is_err());
    }

    #[tokio::test]
    async fn connect_tunnels_to_target() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = target.accept().await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });
        let proxy = spawn_proxy().await;

        let dialer = Socks5Dialer::new(proxy.to_string());
        let mut stream = dialer.connect(&target_addr.to_string()).await.unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn connect_reports_refused_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = Socks5Dialer::new(addr.to_string());

        assert!(dialer.connect("1.2.3.4:53").await.is_err());
    }
}
