//! Client agent implementation.
//!
//! The agent maintains:
//! - A master control connection, used for every control RPC and every
//!   outbound data message, serialized by a single-flight lock
//! - N slave connections, each read by its own task and fed into a shared
//!   receive queue drained by one orchestrator task
//! - A UDP presence beacon
//!
//! Grounded on `chat_agent.py`'s `ChatAgent` for the construction sequence
//! and RPC shape.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use relay_shared::config::RelayConfig;
use relay_shared::discovery::{BeaconKind, DiscoveryBeacon, DiscoveryConfig, DiscoveryHandler};
use relay_shared::net::{Conn, ConnReader};
use relay_shared::protocol::{FileProtocol, Message, MessageFlag, MessageType, ResponseCode, UserRef};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CONNECT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Bound on the receive queue fed by slave reader tasks; back-pressures a
/// reader whose messages the orchestrator hasn't drained yet.
const RECV_QUEUE_CAPACITY: usize = 256;

/// Invoked once per received data message, in orchestrator-task order.
#[async_trait]
pub trait RecvHandler: Send + Sync {
    async fn on_message(&self, msg: Message);
}

/// A no-op handler for agents that only send.
pub struct NullRecvHandler;

#[async_trait]
impl RecvHandler for NullRecvHandler {
    async fn on_message(&self, _msg: Message) {}
}

async fn connect_with_retry(addr: SocketAddr) -> anyhow::Result<Conn> {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(Conn::new(stream)),
            Err(e) => {
                warn!(%addr, error = %e, "connect failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_BACKOFF).await;
            }
        }
    }
}

/// A connected chat agent: one master socket, a pool of slave sockets, and
/// a background discovery beacon.
pub struct ChatAgent {
    username: String,
    server_addr: SocketAddr,
    master: Mutex<Conn>,
    reader_handles: Vec<JoinHandle<()>>,
    orchestrator_handle: Option<JoinHandle<()>>,
    stop_tx: mpsc::Sender<()>,
    beacon: Option<DiscoveryBeacon>,
    current_group: Mutex<Option<String>>,
}

impl ChatAgent {
    /// Runs the full construction sequence: master connect, N slave
    /// connects, IDENTIFY_MASTER/JOIN_SLAVE*N/IDENTIFY_SLAVES under a
    /// temporary lock, then spawns the reader/orchestrator tasks and starts
    /// discovery. On any failure after sockets are open, they're dropped
    /// (closing the TCP connections) before returning the error.
    pub async fn connect(
        cfg: &RelayConfig,
        username: impl Into<String>,
        pool_size: usize,
        handler: Arc<dyn RecvHandler>,
    ) -> anyhow::Result<Self> {
        let username = username.into();
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(%server_addr, username, "connecting to relay server");

        let mut master = connect_with_retry(server_addr).await?;

        let mut slaves = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            slaves.push(connect_with_retry(server_addr).await?);
        }

        master
            .send(&Message::instruction(
                MessageType::IdentifyMaster,
                Some(UserRef::named(username.clone())),
            ))
            .await?;
        let reply = master.recv().await?;
        expect_ok(&reply, "IDENTIFY_MASTER")?;

        let mut readers = Vec::with_capacity(pool_size);
        for mut slave in slaves {
            slave
                .send(&Message::instruction(
                    MessageType::JoinSlave,
                    Some(UserRef::named(username.clone())),
                ))
                .await?;
            let reply = slave.recv().await?;
            expect_ok(&reply, "JOIN_SLAVE")?;
            let (reader, _writer) = slave.into_split();
            readers.push(reader);
        }

        master
            .send(&Message::instruction(
                MessageType::IdentifySlaves,
                Some(UserRef::named(username.clone())),
            ))
            .await?;
        let reply = master.recv().await?;
        expect_ok(&reply, "IDENTIFY_SLAVES")?;

        let (queue_tx, queue_rx) = mpsc::channel::<Message>(RECV_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        let reader_handles = readers
            .into_iter()
            .enumerate()
            .map(|(idx, reader)| spawn_reader(idx, reader, queue_tx.clone()))
            .collect();
        drop(queue_tx);

        let orchestrator_handle = Some(spawn_orchestrator(queue_rx, stop_rx, handler));

        let discovery_cfg = DiscoveryConfig {
            port: cfg.discovery_port,
            period: cfg.discovery_period(),
            service_name: username.clone(),
        };
        let beacon = DiscoveryBeacon::start(
            discovery_cfg,
            BeaconKind::Client,
            Arc::new(SilentDiscoveryHandler),
        )
        .await
        .ok();

        Ok(Self {
            username,
            server_addr,
            master: Mutex::new(master),
            reader_handles,
            orchestrator_handle,
            stop_tx,
            beacon,
            current_group: Mutex::new(None),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    async fn rpc(&self, msg: &Message) -> anyhow::Result<Message> {
        let mut master = self.master.lock().await;
        master.send(msg).await?;
        master.recv().await
    }

    pub async fn get_connected_clients(&self) -> anyhow::Result<Vec<String>> {
        let reply = self
            .rpc(&Message::instruction(
                MessageType::ClientList,
                Some(UserRef::named(self.username.clone())),
            ))
            .await?;
        reply.body_as()
    }

    pub async fn get_groups(&self) -> anyhow::Result<Vec<String>> {
        let reply = self
            .rpc(&Message::instruction(
                MessageType::GroupListGroups,
                Some(UserRef::named(self.username.clone())),
            ))
            .await?;
        reply.body_as()
    }

    pub async fn get_clients_in_group(&self, group: &str) -> anyhow::Result<Vec<String>> {
        let reply = self
            .rpc(&Message::instruction_with_body(
                MessageType::GroupListClients,
                Some(UserRef::named(self.username.clone())),
                &group.to_string(),
            )?)
            .await?;
        reply.body_as()
    }

    pub async fn create_group(&self, group: &str) -> anyhow::Result<ResponseCode> {
        let reply = self
            .rpc(&Message::instruction_with_body(
                MessageType::GroupCreate,
                Some(UserRef::named(self.username.clone())),
                &group.to_string(),
            )?)
            .await?;
        response_code(&reply)
    }

    pub async fn join_group(&self, group: &str) -> anyhow::Result<ResponseCode> {
        let reply = self
            .rpc(&Message::instruction_with_body(
                MessageType::GroupJoin,
                Some(UserRef::named(self.username.clone())),
                &group.to_string(),
            )?)
            .await?;
        let code = response_code(&reply)?;
        if code == ResponseCode::Ok {
            *self.current_group.lock().await = Some(group.to_string());
        }
        Ok(code)
    }

    /// Convenience: `create_group` then `join_group`, matching the original
    /// agent's combined helper. The group may already exist (EXISTS is not
    /// an error for this call's purposes).
    pub async fn create_and_join(&self, group: &str) -> anyhow::Result<(ResponseCode, ResponseCode)> {
        let create = self.create_group(group).await?;
        let join = self.join_group(group).await?;
        Ok((create, join))
    }

    pub async fn leave_group(&self, group: &str) -> anyhow::Result<ResponseCode> {
        let reply = self
            .rpc(&Message::instruction_with_body(
                MessageType::GroupLeave,
                Some(UserRef::named(self.username.clone())),
                &group.to_string(),
            )?)
            .await?;
        let code = response_code(&reply)?;
        if code == ResponseCode::Ok {
            *self.current_group.lock().await = None;
        }
        Ok(code)
    }

    pub async fn leave_all_groups(&self) -> anyhow::Result<ResponseCode> {
        let reply = self
            .rpc(&Message::instruction(
                MessageType::GroupLeaveAll,
                Some(UserRef::named(self.username.clone())),
            ))
            .await?;
        let code = response_code(&reply)?;
        *self.current_group.lock().await = None;
        Ok(code)
    }

    pub async fn send_private(
        &self,
        recipient: &str,
        msg_type: MessageType,
        body: Vec<u8>,
    ) -> anyhow::Result<ResponseCode> {
        let reply = self
            .rpc(&Message::data(
                msg_type,
                Some(UserRef::named(self.username.clone())),
                Some(UserRef::named(recipient)),
                None,
                body,
            ))
            .await?;
        response_code(&reply)
    }

    pub async fn send_group(
        &self,
        group: &str,
        msg_type: MessageType,
        body: Vec<u8>,
    ) -> anyhow::Result<ResponseCode> {
        let reply = self
            .rpc(&Message::data(
                msg_type,
                Some(UserRef::named(self.username.clone())),
                Some(UserRef::for_group(group)),
                None,
                body,
            ))
            .await?;
        response_code(&reply)
    }

    /// `ANNOUNCE` only flags how a recipient presents the message; it carries
    /// no `dst`, so the server routes it exactly like any other unaddressed
    /// data message and replies `ERROR` (see the Glossary and DESIGN.md).
    pub async fn announce(&self, msg_type: MessageType, body: Vec<u8>) -> anyhow::Result<ResponseCode> {
        let reply = self
            .rpc(&Message::data(
                msg_type,
                Some(UserRef::named(self.username.clone())),
                None,
                Some(MessageFlag::Announce),
                body,
            ))
            .await?;
        response_code(&reply)
    }

    /// Sends a file to one recipient.
    pub async fn send_file(&self, recipient: &str, file: FileProtocol) -> anyhow::Result<ResponseCode> {
        let body = serde_json::to_vec(&file)?;
        self.send_private(recipient, MessageType::File, body).await
    }

    /// Sends a file to an entire group.
    pub async fn send_file_to_group(&self, group: &str, file: FileProtocol) -> anyhow::Result<ResponseCode> {
        let body = serde_json::to_vec(&file)?;
        self.send_group(group, MessageType::File, body).await
    }

    /// Shuts the agent down: stops the orchestrator, joins the readers,
    /// stops the beacon. Idempotent in the sense that a second call finds
    /// nothing left to stop.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(()).await;
        if let Some(handle) = self.orchestrator_handle.take() {
            let _ = handle.await;
        }
        for handle in self.reader_handles.drain(..) {
            handle.abort();
        }
        if let Some(beacon) = self.beacon.take() {
            beacon.stop().await;
        }
    }
}

fn expect_ok(msg: &Message, step: &str) -> anyhow::Result<()> {
    match msg.response {
        Some(ResponseCode::Ok) => Ok(()),
        Some(other) => bail!("{step} failed: {other:?}"),
        None => bail!("{step} got a non-response message"),
    }
}

fn response_code(msg: &Message) -> anyhow::Result<ResponseCode> {
    msg.response.context("expected a response code")
}

struct SilentDiscoveryHandler;

#[async_trait]
impl DiscoveryHandler for SilentDiscoveryHandler {
    async fn on_discovered(&self, _msg: Message) {}
}

fn spawn_reader(idx: usize, mut reader: ConnReader, tx: mpsc::Sender<Message>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(slave = idx, error = %e, "slave connection closed");
                    break;
                }
            }
        }
    })
}

fn spawn_orchestrator(
    mut queue_rx: mpsc::Receiver<Message>,
    mut stop_rx: mpsc::Receiver<()>,
    handler: Arc<dyn RecvHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                msg = queue_rx.recv() => {
                    match msg {
                        Some(msg) => handler.on_message(msg).await,
                        None => break,
                    }
                }
            }
        }
    })
}
