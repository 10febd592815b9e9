//! Upstream callers.
//!
//! A [`Caller`] sends one wire-format query to one upstream resolver and
//! returns its wire-format response. The transport is chosen once, when the
//! caller is built from configuration:
//!
//! - [`DnsCaller`]: plain DNS over UDP (falling back to TCP on truncation) or TCP
//! - [`DotCaller`]: DNS-over-TLS with length-prefixed framing
//! - [`DohCaller`]: DNS-over-HTTPS POST of the raw message
//!
//! Every variant can dial through a [`Socks5Dialer`](crate::socks5::Socks5Dialer).

mod dns;
mod doh;
mod dot;

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::dns::{is_response, message_id};
use crate::error::CallError;

pub use dns::{DnsCaller, Network};
pub use doh::{DohCaller, is_doh_url};
pub use dot::DotCaller;

/// Upper bound of a single upstream call when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One upstream resolver.
pub enum Caller {
    Dns(DnsCaller),
    Dot(DotCaller),
    Doh(DohCaller),
}

impl Caller {
    /// Forward a query and return the upstream's response.
    ///
    /// Timeouts, transport failures and responses that do not answer this
    /// query all come back as `Err`.
    pub async fn call(&self, query: &[u8]) -> Result<Vec<u8>, CallError> {
        let timeout = self.timeout();
        let exchange = async {
            match self {
                Caller::Dns(caller) => caller.call(query).await,
                Caller::Dot(caller) => caller.call(query).await,
                Caller::Doh(caller) => caller.call(query).await,
            }
        };

        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| CallError::Timeout(timeout))??;

        if !is_response(&response) {
            return Err(CallError::Malformed("not a DNS response"));
        }
        if message_id(&response) != message_id(query) {
            return Err(CallError::Malformed("transaction id mismatch"));
        }
        Ok(response)
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Caller::Dns(caller) => caller.timeout,
            Caller::Dot(caller) => caller.timeout,
            Caller::Doh(caller) => caller.timeout,
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Dns(caller) => caller.fmt(f),
            Caller::Dot(caller) => caller.fmt(f),
            Caller::Doh(caller) => caller.fmt(f),
        }
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Send a length-prefixed message and read the length-prefixed reply.
async fn exchange_framed<S>(stream: &mut S, query: &[u8]) -> Result<Vec<u8>, CallError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = u16::try_from(query.len()).map_err(|_| CallError::Malformed("query too large"))?;
    let mut framed = Vec::with_capacity(2 + query.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(query);
    stream.write_all(&framed).await?;
    stream.flush().await?;

    let len = stream.read_u16().await? as usize;
    let mut response = vec![0u8; len];
    stream.read_exact(&mut response).await?;
    Ok(response)
}
