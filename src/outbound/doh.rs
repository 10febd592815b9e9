//! DNS-over-HTTPS.

use std::fmt;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Certificate, Client, Proxy};
use rustls::pki_types::CertificateDer;

use crate::error::CallError;
use crate::socks5::Socks5Dialer;

const DNS_MESSAGE: &str = "application/dns-message";

/// Whether `url` has the `https://<host>/dns-query` shape.
pub fn is_doh_url(url: &str) -> bool {
    url.strip_prefix("https://")
        .and_then(|rest| rest.strip_suffix("/dns-query"))
        .is_some_and(|host| !host.is_empty() && !host.starts_with('/'))
}

/// DNS-over-HTTPS upstream using POST with a wire-format body.
pub struct DohCaller {
    url: String,
    client: Client,
    proxied: bool,
    pub(super) timeout: Duration,
}

impl DohCaller {
    pub fn new(
        url: impl Into<String>,
        dialer: Option<&Socks5Dialer>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Self::with_roots(url, &[], dialer, timeout)
    }

    /// Like [`DohCaller::new`], additionally trusting `roots`.
    pub fn with_roots(
        url: impl Into<String>,
        roots: &[CertificateDer<'_>],
        dialer: Option<&Socks5Dialer>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60));
        if let Some(dialer) = dialer {
            // socks5h: the proxy resolves the DoH host name
            builder = builder.proxy(Proxy::all(format!("socks5h://{}", dialer.proxy()))?);
        }
        for root in roots {
            builder = builder.add_root_certificate(Certificate::from_der(root)?);
        }

        Ok(Self {
            url: url.into(),
            client: builder.build()?,
            proxied: dialer.is_some(),
            timeout,
        })
    }

    pub(super) async fn call(&self, query: &[u8]) -> Result<Vec<u8>, CallError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(query.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CallError::HttpStatus(response.status()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

impl fmt::Display for DohCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)?;
        if self.proxied {
            f.write_str(" via socks5")?;
        }
        Ok(())
    }
}
