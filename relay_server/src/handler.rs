//! Per-connection message handler.
//!
//! Grounded on `server_chat.py`'s `__handle_message` / `__process_instruction`
//! / `__process_data`. A connection starts full-duplex; if it successfully
//! `JOIN_SLAVE`s, its write half is handed to the registry's pending-slave
//! list and this task continues reading the (now push-only) read half until
//! the peer disconnects. Instructions and data messages both arrive on the
//! full-duplex (master) connection — a client's slave sockets only ever
//! receive pushed deliveries, they never originate a request.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_shared::net::{Conn, ConnReader};
use relay_shared::protocol::{Message, MessageType, ResponseCode};
use tracing::{debug, info, warn};

use crate::registry::{self, DeliveryPlan, Registry};

enum Half {
    Duplex(Conn),
    ReadOnly(ConnReader),
}

/// What to do with the connection after handling one message on it.
enum Next {
    KeepDuplex(Conn),
    BecameReadOnly(ConnReader),
    Stop,
}

pub async fn handle_connection(conn: Conn, registry: Arc<Registry>, peer: SocketAddr) {
    let mut this_client: Option<String> = None;
    let mut half = Half::Duplex(conn);

    loop {
        half = match half {
            Half::Duplex(mut conn) => {
                let msg = match conn.recv().await {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(%peer, error = %e, "connection closed");
                        break;
                    }
                };

                let next = if msg.msg_type.is_instruction() {
                    handle_instruction(&registry, conn, &mut this_client, msg).await
                } else if this_client.is_some() {
                    handle_data(&registry, conn, this_client.as_deref().unwrap(), msg).await
                } else {
                    // Data arriving before identification is dropped silently.
                    Next::KeepDuplex(conn)
                };

                match next {
                    Next::KeepDuplex(conn) => Half::Duplex(conn),
                    Next::BecameReadOnly(reader) => Half::ReadOnly(reader),
                    Next::Stop => break,
                }
            }
            Half::ReadOnly(mut reader) => {
                match reader.recv().await {
                    Ok(_msg) => {
                        debug!(%peer, "message received on a slave-only connection; ignoring");
                        Half::ReadOnly(reader)
                    }
                    Err(e) => {
                        debug!(%peer, error = %e, "connection closed");
                        break;
                    }
                }
            }
        };
    }

    if let Some(username) = this_client {
        registry.cleanup(&username).await;
    }
}

/// Handles one INSTRUCTION message, consuming `conn` and handing back what
/// the connection loop should do next.
async fn handle_instruction(
    registry: &Registry,
    mut conn: Conn,
    this_client: &mut Option<String>,
    msg: Message,
) -> Next {
    let result: anyhow::Result<Next> = async {
        match msg.msg_type {
            MessageType::IdentifyMaster => {
                let username = registry::username_of(&msg.src)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string);
                let response = match username {
                    Some(ref username) => registry.identify_master(username).await,
                    None => ResponseCode::Error,
                };
                if response == ResponseCode::Ok {
                    *this_client = username;
                }
                conn.send(&Message::response(response, None)).await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::JoinSlave => {
                let username = registry::username_of(&msg.src).map(str::to_string);
                let response = match &username {
                    Some(username) => registry.join_slave(username).await,
                    None => ResponseCode::NotExist,
                };
                conn.send(&Message::response(response, None)).await?;
                if response != ResponseCode::Ok {
                    return Ok(Next::KeepDuplex(conn));
                }
                let username = username.unwrap();
                info!(username, "slave joined");
                let (reader, writer) = conn.into_split();
                registry.push_pending_slave(&username, writer).await;
                *this_client = Some(username);
                Ok(Next::BecameReadOnly(reader))
            }

            MessageType::IdentifySlaves => {
                let response = match this_client {
                    Some(username) => registry.identify_slaves(username).await,
                    None => ResponseCode::NotExist,
                };
                conn.send(&Message::response(response, None)).await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::ClientList => {
                if this_client.is_none() {
                    conn.send(&Message::response(ResponseCode::Error, None)).await?;
                    return Ok(Next::KeepDuplex(conn));
                }
                let names = registry.client_list().await;
                conn.send(&registry::names_response(names)?).await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::ClientRename => {
                // Reserved: never implemented by the original either.
                conn.send(&Message::response(ResponseCode::NotExist, None))
                    .await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::GroupListGroups => {
                if this_client.is_none() {
                    conn.send(&Message::response(ResponseCode::Error, None)).await?;
                    return Ok(Next::KeepDuplex(conn));
                }
                let groups = registry.group_list().await;
                conn.send(&registry::names_response(groups)?).await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::GroupListClients => {
                let group = msg.body_as_string().unwrap_or_default();
                match registry.group_clients(&group).await {
                    Some(members) => conn.send(&registry::names_response(members)?).await?,
                    None => {
                        conn.send(&Message::response(ResponseCode::NotExist, None))
                            .await?
                    }
                }
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::GroupCreate => {
                let group = msg.body_as_string().unwrap_or_default();
                let response = registry.group_create(&group).await;
                conn.send(&Message::response(response, None)).await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::GroupJoin => {
                let group = msg.body_as_string().unwrap_or_default();
                let response = match this_client {
                    Some(username) => registry.group_join(username, &group).await,
                    None => ResponseCode::Error,
                };
                conn.send(&Message::response(response, None)).await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::GroupLeave => {
                let group = msg.body_as_string().unwrap_or_default();
                let response = match this_client {
                    Some(username) => registry.group_leave(username, &group).await,
                    None => ResponseCode::Error,
                };
                conn.send(&Message::response(response, None)).await?;
                Ok(Next::KeepDuplex(conn))
            }

            MessageType::GroupLeaveAll => {
                let response = match this_client {
                    Some(username) => registry.group_leave_all(username).await,
                    None => ResponseCode::Error,
                };
                conn.send(&Message::response(response, None)).await?;
                Ok(Next::KeepDuplex(conn))
            }

            // Discovery broadcasts never arrive over TCP; anything else
            // unrecognized is dropped.
            _ => Ok(Next::KeepDuplex(conn)),
        }
    }
    .await;

    match result {
        Ok(next) => next,
        Err(e) => {
            warn!(error = %e, "instruction handling failed");
            Next::Stop
        }
    }
}

/// Handles one DATA message, replying directly over the sender's own
/// connection (the same master socket it used to send the message).
async fn handle_data(registry: &Registry, mut conn: Conn, src: &str, msg: Message) -> Next {
    let result: anyhow::Result<()> = async {
        match registry.plan_delivery(src, &msg).await {
            DeliveryPlan::Dispatch { targets, reply } => {
                for (name, pool) in targets {
                    let msg = msg.clone();
                    tokio::spawn(async move {
                        if let Err(e) = pool.send(&msg).await {
                            warn!(recipient = %name, error = %e, "delivery failed");
                        }
                    });
                }
                conn.send(&Message::response(reply, None)).await?;
            }
            DeliveryPlan::ReplyOnly(response) => {
                conn.send(&Message::response(response, None)).await?;
            }
            DeliveryPlan::Silent => {}
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => Next::KeepDuplex(conn),
        Err(e) => {
            warn!(error = %e, "data handling failed");
            Next::Stop
        }
    }
}
