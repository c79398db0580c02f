//! Scenario 6: a passive listener observes both a server's and a client's
//! presence beacons, and neither beacon observes its own broadcast.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use relay_client::{ChatAgent, NullRecvHandler};
use relay_server::RelayServer;
use relay_shared::config::RelayConfig;
use relay_shared::protocol::{Message, MessageType};
use socket2::{Domain, Protocol, Socket, Type};
use std::sync::Arc;
use tokio::net::UdpSocket;

fn bind_passive_listener(port: u16) -> UdpSocket {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
    socket.set_reuse_address(true).unwrap();
    socket.set_nonblocking(true).unwrap();
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())
        .unwrap();
    UdpSocket::from_std(socket.into()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn passive_listener_observes_server_and_client_beacons() {
    let discovery_port = 50210;
    let listener = bind_passive_listener(discovery_port);

    let mut server_cfg = RelayConfig::default();
    server_cfg.server_addr = "127.0.0.1:0".to_string();
    server_cfg.discovery_port = discovery_port;
    server_cfg.discovery_period_secs = 1;
    server_cfg.service_name = "srv".to_string();

    let mut server = RelayServer::bind(server_cfg.clone()).await.unwrap();
    let server_addr = server.local_addr().unwrap().to_string();
    server.start_discovery().await.unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let mut client_cfg = server_cfg;
    client_cfg.server_addr = server_addr;
    let agent = ChatAgent::connect(&client_cfg, "c", 2, Arc::new(NullRecvHandler))
        .await
        .unwrap();

    let mut buf = vec![0u8; 4096];
    let mut saw_server = false;
    let mut saw_client = false;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline && !(saw_server && saw_client) {
        match tokio::time::timeout(Duration::from_millis(200), listener.recv_from(&mut buf)).await
        {
            Ok(Ok((n, _from))) => {
                if let Ok(msg) = serde_json::from_slice::<Message>(&buf[..n]) {
                    let name = msg.src.as_ref().and_then(|s| s.username.clone());
                    match msg.msg_type {
                        MessageType::BroadcastServerDisc if name.as_deref() == Some("srv") => {
                            saw_server = true;
                        }
                        MessageType::BroadcastClientDisc if name.as_deref() == Some("c") => {
                            saw_client = true;
                        }
                        _ => {}
                    }
                }
            }
            _ => continue,
        }
    }

    assert!(saw_server, "expected a SERVER_DISC datagram from 'srv'");
    assert!(saw_client, "expected a CLIENT_DISC datagram from 'c'");

    agent.shutdown().await;
}
