//! UDP discovery beacon.
//!
//! A single UDP socket, bound with `SO_BROADCAST` and `SO_REUSEADDR`, is
//! shared by a periodic transmitter and a listener. The listener filters out
//! our own broadcasts by comparing the raw datagram against the exact bytes
//! we last sent, the same self-echo check the original `UdpBroadcast` uses.
//!
//! Grounded on the original `broadcast.py` for the transmit/listen-loop
//! shape and on `discovery.rs` from the LAN-sync example pack for the
//! idiomatic `socket2`-then-`tokio` bind sequence.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{Message, MessageType, UserRef};

/// Default UDP discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 50001;
/// Default broadcast period.
pub const DEFAULT_DISCOVERY_PERIOD: Duration = Duration::from_secs(1);

/// How often the listener polls for shutdown while blocked on `recv_from`.
const LISTEN_POLL: Duration = Duration::from_millis(250);

/// Distinguishes a server's presence beacon from a client's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconKind {
    Server,
    Client,
}

impl BeaconKind {
    fn message_type(self) -> MessageType {
        match self {
            BeaconKind::Server => MessageType::BroadcastServerDisc,
            BeaconKind::Client => MessageType::BroadcastClientDisc,
        }
    }
}

/// Receives a discovery datagram from another peer. Implemented by whatever
/// front-end wants to display discovered peers.
#[async_trait]
pub trait DiscoveryHandler: Send + Sync {
    async fn on_discovered(&self, msg: Message);
}

/// Configuration for one beacon instance.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub port: u16,
    pub period: Duration,
    pub service_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            period: DEFAULT_DISCOVERY_PERIOD,
            service_name: "relay".to_string(),
        }
    }
}

fn bind_broadcast_socket(port: u16) -> anyhow::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// A running discovery beacon: one shared socket, one transmitter task, one
/// listener task.
pub struct DiscoveryBeacon {
    stop: Arc<AtomicBool>,
    tx_handle: JoinHandle<()>,
    rx_handle: JoinHandle<()>,
}

impl DiscoveryBeacon {
    /// Binds the shared socket and spawns both loops.
    pub async fn start(
        cfg: DiscoveryConfig,
        kind: BeaconKind,
        handler: Arc<dyn DiscoveryHandler>,
    ) -> anyhow::Result<Self> {
        let std_socket = bind_broadcast_socket(cfg.port)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);

        let template = Message::instruction(kind.message_type(), Some(UserRef::named(cfg.service_name.clone())));
        let template_bytes = Arc::new(serde_json::to_vec(&template)?);

        let stop = Arc::new(AtomicBool::new(false));
        let broadcast_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, cfg.port));

        let tx_handle = {
            let socket = Arc::clone(&socket);
            let stop = Arc::clone(&stop);
            let template_bytes = Arc::clone(&template_bytes);
            let period = cfg.period;
            tokio::spawn(async move {
                while !stop.load(Ordering::Relaxed) {
                    if let Err(e) = socket.send_to(&template_bytes, broadcast_addr).await {
                        warn!(error = %e, "discovery beacon send failed");
                    }
                    tokio::time::sleep(period).await;
                }
            })
        };

        let rx_handle = {
            let socket = Arc::clone(&socket);
            let stop = Arc::clone(&stop);
            let template_bytes = Arc::clone(&template_bytes);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                while !stop.load(Ordering::Relaxed) {
                    match tokio::time::timeout(LISTEN_POLL, socket.recv_from(&mut buf)).await {
                        Ok(Ok((n, from))) => {
                            if buf[..n] == template_bytes[..] {
                                continue; // self-echo
                            }
                            match serde_json::from_slice::<Message>(&buf[..n]) {
                                Ok(mut msg) => {
                                    if let Some(src) = msg.src.as_mut() {
                                        src.address = Some(from);
                                    } else {
                                        msg.src = Some(UserRef {
                                            username: None,
                                            group: None,
                                            address: Some(from),
                                        });
                                    }
                                    handler.on_discovered(msg).await;
                                }
                                Err(e) => debug!(error = %e, "malformed discovery datagram"),
                            }
                        }
                        Ok(Err(e)) => warn!(error = %e, "discovery beacon recv failed"),
                        Err(_) => continue, // poll timeout, re-check stop flag
                    }
                }
            })
        };

        Ok(Self {
            stop,
            tx_handle,
            rx_handle,
        })
    }

    /// Idempotent: repeated calls after the first are a no-op wait.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.tx_handle.await;
        let _ = self.rx_handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct Collector(Mutex<Vec<Message>>);

    #[async_trait]
    impl DiscoveryHandler for Collector {
        async fn on_discovered(&self, msg: Message) {
            self.0.lock().await.push(msg);
        }
    }

    #[tokio::test]
    async fn beacon_does_not_observe_its_own_broadcast() {
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        let cfg = DiscoveryConfig {
            port: 50199,
            period: Duration::from_millis(30),
            service_name: "srv".to_string(),
        };

        let beacon = DiscoveryBeacon::start(cfg, BeaconKind::Server, collector.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        beacon.stop().await;

        assert!(collector.0.lock().await.is_empty());
    }
}
