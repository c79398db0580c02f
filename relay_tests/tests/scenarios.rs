//! End-to-end scenarios run against a real `RelayServer` + `ChatAgent`
//! pair, bound to ephemeral ports on loopback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_client::{ChatAgent, NullRecvHandler, RecvHandler};
use relay_server::RelayServer;
use relay_shared::config::RelayConfig;
use relay_shared::net::Conn;
use relay_shared::protocol::{Message, MessageType, ResponseCode};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

struct Collector(Mutex<Vec<Message>>);

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    async fn messages(&self) -> Vec<Message> {
        self.0.lock().await.clone()
    }
}

#[async_trait]
impl RecvHandler for Collector {
    async fn on_message(&self, msg: Message) {
        self.0.lock().await.push(msg);
    }
}

async fn ephemeral_server() -> (RelayServer, RelayConfig) {
    let mut cfg = RelayConfig::default();
    cfg.server_addr = "127.0.0.1:0".to_string();
    cfg.discovery_port = 0; // scenarios here don't need discovery
    let server = RelayServer::bind(cfg.clone()).await.unwrap();
    cfg.server_addr = server.local_addr().unwrap().to_string();
    (server, cfg)
}

fn spawn_server(server: RelayServer) {
    tokio::spawn(async move {
        let _ = server.run().await;
    });
}

async fn wait_for(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identification_collision_rejects_the_second_agent() {
    let (server, cfg) = ephemeral_server().await;
    spawn_server(server);

    let first = ChatAgent::connect(&cfg, "alice", 2, Arc::new(NullRecvHandler))
        .await
        .unwrap();

    let second = ChatAgent::connect(&cfg, "alice", 2, Arc::new(NullRecvHandler)).await;
    assert!(second.is_err(), "duplicate IDENTIFY_MASTER must fail");

    let clients = first.get_connected_clients().await.unwrap();
    assert_eq!(clients, vec!["alice".to_string()]);

    first.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn private_message_is_delivered_to_its_recipient() {
    let (server, cfg) = ephemeral_server().await;
    spawn_server(server);

    let a = ChatAgent::connect(&cfg, "a", 4, Arc::new(NullRecvHandler))
        .await
        .unwrap();
    let b_collector = Collector::new();
    let b = ChatAgent::connect(&cfg, "b", 4, b_collector.clone())
        .await
        .unwrap();

    let response = a
        .send_private("b", MessageType::PlainText, b"hi".to_vec())
        .await
        .unwrap();
    assert_eq!(response, ResponseCode::Ok);

    let got = wait_for(
        || {
            b_collector
                .0
                .try_lock()
                .map(|msgs| !msgs.is_empty())
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(got, "b never received the private message");

    let messages = b_collector.messages().await;
    assert_eq!(messages[0].body_as_string().unwrap(), "hi");
    assert_eq!(
        messages[0].src.as_ref().and_then(|s| s.username.clone()),
        Some("a".to_string())
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 6)]
async fn group_fan_out_excludes_the_sender() {
    let (server, cfg) = ephemeral_server().await;
    spawn_server(server);

    let x = ChatAgent::connect(&cfg, "x", 2, Arc::new(NullRecvHandler))
        .await
        .unwrap();
    let y_collector = Collector::new();
    let y = ChatAgent::connect(&cfg, "y", 2, y_collector.clone())
        .await
        .unwrap();
    let z_collector = Collector::new();
    let z = ChatAgent::connect(&cfg, "z", 2, z_collector.clone())
        .await
        .unwrap();

    let (create_x, join_x) = x.create_and_join("room").await.unwrap();
    assert_eq!((create_x, join_x), (ResponseCode::Ok, ResponseCode::Ok));
    let (create_y, join_y) = y.create_and_join("room").await.unwrap();
    assert_eq!((create_y, join_y), (ResponseCode::Exists, ResponseCode::Ok));
    let (create_z, join_z) = z.create_and_join("room").await.unwrap();
    assert_eq!((create_z, join_z), (ResponseCode::Exists, ResponseCode::Ok));

    let response = x
        .send_group("room", MessageType::PlainText, b"hello".to_vec())
        .await
        .unwrap();
    assert_eq!(response, ResponseCode::Ok);

    let y_got = wait_for(
        || y_collector.0.try_lock().map(|m| !m.is_empty()).unwrap_or(false),
        Duration::from_secs(2),
    )
    .await;
    let z_got = wait_for(
        || z_collector.0.try_lock().map(|m| !m.is_empty()).unwrap_or(false),
        Duration::from_secs(2),
    )
    .await;
    assert!(y_got && z_got, "both group members should receive the message");

    x.shutdown().await;
    y.shutdown().await;
    z.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 6)]
async fn disconnect_cleans_up_client_and_group_membership() {
    let (server, cfg) = ephemeral_server().await;
    spawn_server(server);

    let x = ChatAgent::connect(&cfg, "x", 2, Arc::new(NullRecvHandler))
        .await
        .unwrap();
    let y = ChatAgent::connect(&cfg, "y", 2, Arc::new(NullRecvHandler))
        .await
        .unwrap();
    let z = ChatAgent::connect(&cfg, "z", 2, Arc::new(NullRecvHandler))
        .await
        .unwrap();

    x.create_and_join("room").await.unwrap();
    y.create_and_join("room").await.unwrap();
    z.create_and_join("room").await.unwrap();

    z.shutdown().await;

    // Cleanup happens on the server's next read of the closed socket;
    // give it a moment rather than polling an async condition directly.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let clients = x.get_connected_clients().await.unwrap();
    assert!(!clients.contains(&"z".to_string()));

    let members = x.get_clients_in_group("room").await.unwrap();
    assert_eq!(members, vec!["x".to_string(), "y".to_string()]);

    let groups = x.get_groups().await.unwrap();
    assert!(groups.contains(&"room".to_string()), "room must still exist");

    x.shutdown().await;
    y.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sending_to_oneself_is_rejected() {
    let (server, cfg) = ephemeral_server().await;
    spawn_server(server);

    let collector = Collector::new();
    let a = ChatAgent::connect(&cfg, "a", 2, collector.clone())
        .await
        .unwrap();

    let response = a
        .send_private("a", MessageType::PlainText, b"self".to_vec())
        .await
        .unwrap();
    assert_eq!(response, ResponseCode::Error);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(collector.messages().await.is_empty());

    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_queries_before_identification_are_rejected() {
    let (server, cfg) = ephemeral_server().await;
    spawn_server(server);

    let stream = TcpStream::connect(cfg.server_addr.parse::<std::net::SocketAddr>().unwrap())
        .await
        .unwrap();
    let mut conn = Conn::new(stream);

    conn.send(&Message::instruction(MessageType::ClientList, None))
        .await
        .unwrap();
    let reply = conn.recv().await.unwrap();
    assert_eq!(reply.response, Some(ResponseCode::Error));

    conn.send(&Message::instruction(MessageType::GroupListGroups, None))
        .await
        .unwrap();
    let reply = conn.recv().await.unwrap();
    assert_eq!(reply.response, Some(ResponseCode::Error));
}
