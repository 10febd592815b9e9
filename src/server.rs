//! Server orchestration.
//!
//! Binds transports, runs the periodic stats report and reloads the
//! configuration on SIGHUP.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::handler::Handler;
use crate::transport::Service;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Bound, not yet serving, UDP and TCP listeners.
pub struct Server {
    service: Arc<Service>,
    udp: UdpTransport,
    tcp: TcpTransport,
}

impl Server {
    /// Bind UDP and TCP on the same address. With port 0 the TCP listener
    /// takes the port the UDP socket was given.
    pub async fn bind(addr: SocketAddr, handler: Handler) -> io::Result<Self> {
        let udp = UdpTransport::bind(addr).await?;
        let tcp = TcpTransport::bind(udp.local_addr()?).await?;

        Ok(Self {
            service: Arc::new(Service::new(handler)),
            udp,
            tcp,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Start serving in the background.
    pub fn start(self) -> Arc<Service> {
        let handler = self.service.handler();
        info!(
            addr = ?self.udp.local_addr().ok(),
            groups = handler.groups().len(),
            "crossroad listening"
        );

        self.udp.start(Arc::clone(&self.service));
        self.tcp.start(Arc::clone(&self.service));

        // Report stats every minute
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await; // Skip first immediate tick
            loop {
                interval.tick().await;
                let stats = service.stats().snapshot_and_reset();
                info!(
                    uptime = service.uptime().as_secs(),
                    cache = service.handler().cache_len(),
                    requests = stats.requests,
                    hosts = stats.hosts,
                    cached = stats.cached,
                    resolved = stats.resolved,
                    failed = stats.failed,
                    avg_response_ms = stats.avg_response_ms,
                    "stats"
                );
            }
        });

        self.service
    }
}

/// Serve until the process exits, reloading `config_path` on SIGHUP.
pub async fn run(server: Server, config_path: PathBuf) -> io::Result<()> {
    let service = server.start();
    reload_on_hangup(service, config_path).await
}

#[cfg(unix)]
async fn reload_on_hangup(service: Arc<Service>, config_path: PathBuf) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::error;

    use crate::config::Config;

    let mut hangup = signal(SignalKind::hangup())?;
    while hangup.recv().await.is_some() {
        info!(path = %config_path.display(), "reloading configuration");

        let path = config_path.clone();
        let built =
            tokio::task::spawn_blocking(move || Config::load(&path)?.build_handler()).await;
        match built {
            Ok(Ok(handler)) => {
                service.replace(handler);
                info!("configuration reloaded");
            }
            Ok(Err(err)) => error!("reload failed, keeping previous configuration: {err}"),
            Err(err) => error!("reload task failed: {err}"),
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn reload_on_hangup(_service: Arc<Service>, _config_path: PathBuf) -> io::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
