//! Server orchestration: binds the TCP listener and UDP discovery beacon,
//! then spawns one task per accepted connection against a shared
//! [`Registry`].
//!
//! Grounded on `server_chat.py`'s `ChatServer.run` accept loop, split here
//! into a `Listener`/spawn pattern the way `ReliableListener` was driven in
//! the engine server this crate started from.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use relay_shared::config::RelayConfig;
use relay_shared::discovery::{BeaconKind, DiscoveryBeacon, DiscoveryConfig, DiscoveryHandler};
use relay_shared::net::Listener;
use relay_shared::protocol::Message;
use tracing::{info, warn};

use crate::handler;
use crate::registry::Registry;

/// Logs discovery datagrams the server happens to observe (typically other
/// servers, or clients that haven't connected yet). The server doesn't act
/// on these; it only broadcasts its own presence.
struct LoggingDiscoveryHandler;

#[async_trait]
impl DiscoveryHandler for LoggingDiscoveryHandler {
    async fn on_discovered(&self, msg: Message) {
        if let Some(src) = &msg.src {
            if let Some(addr) = src.address {
                info!(%addr, "observed a discovery broadcast");
                return;
            }
        }
        info!("observed a discovery broadcast");
    }
}

/// The running relay server: a bound TCP listener, a shared client/group
/// registry, and (once started) a UDP discovery beacon.
pub struct RelayServer {
    listener: Listener,
    registry: Arc<Registry>,
    cfg: RelayConfig,
    beacon: Option<DiscoveryBeacon>,
}

impl RelayServer {
    pub async fn bind(cfg: RelayConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = Listener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            cfg,
            beacon: None,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Starts broadcasting a server-presence beacon on the discovery port.
    /// Idempotent only in the sense that calling it twice leaks the first
    /// beacon's tasks; callers are expected to call it once at startup.
    pub async fn start_discovery(&mut self) -> anyhow::Result<()> {
        let discovery_cfg = DiscoveryConfig {
            port: self.cfg.discovery_port,
            period: self.cfg.discovery_period(),
            service_name: self.cfg.service_name.clone(),
        };
        let beacon = DiscoveryBeacon::start(
            discovery_cfg,
            BeaconKind::Server,
            Arc::new(LoggingDiscoveryHandler),
        )
        .await?;
        self.beacon = Some(beacon);
        Ok(())
    }

    /// Accepts and serves connections until the listener errs or the
    /// process is killed. Each connection runs on its own task against the
    /// shared registry.
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            let (conn, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            info!(%peer, "accepted connection");
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                handler::handle_connection(conn, registry, peer).await;
            });
        }
    }

    /// Stops the discovery beacon, if one was started.
    pub async fn stop_discovery(&mut self) {
        if let Some(beacon) = self.beacon.take() {
            beacon.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_an_ephemeral_port() {
        let mut cfg = RelayConfig::default();
        cfg.server_addr = "127.0.0.1:0".to_string();
        let server = RelayServer::bind(cfg).await.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
    }
}
