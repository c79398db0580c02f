//! The server's authoritative state: connected clients, their socket pools,
//! and groups.
//!
//! Grounded on `server_chat.py`'s `ChatServer.__clients` /
//! `__sock_pools` / `__groups` dicts. There they're unguarded and relied on
//! Python's GIL; here a single [`Mutex`] covers all three maps, held only
//! across the short classify-and-mutate regions described in the handler —
//! never across socket I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relay_shared::error::RelayError;
use relay_shared::net::ConnWriter;
use relay_shared::protocol::{Message, ResponseCode, UserRef};
use relay_shared::socket_pool::SocketPool;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct ClientRecord {
    group: Option<String>,
}

struct Inner {
    clients: HashMap<String, ClientRecord>,
    pending_slaves: HashMap<String, Vec<ConnWriter>>,
    sock_pools: HashMap<String, Arc<SocketPool>>,
    groups: HashMap<String, HashSet<String>>,
}

/// A planned data delivery: which recipients to fan out to, and what the
/// sender should be told. `targets` is empty (and `reply` absent) for the
/// group-membership-required quirk below, where the original silently drops
/// the message instead of replying.
pub enum DeliveryPlan {
    Dispatch {
        targets: Vec<(String, Arc<SocketPool>)>,
        reply: ResponseCode,
    },
    /// The original source silently drops a group message from a sender who
    /// isn't a member of the target group — no reply at all. Preserved here
    /// rather than "fixed" to ERROR, since it's unclear whether that silence
    /// is intentional (avoiding confirming a group's membership state to an
    /// outsider) or accidental; see DESIGN.md.
    Silent,
    ReplyOnly(ResponseCode),
}

pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                clients: HashMap::new(),
                pending_slaves: HashMap::new(),
                sock_pools: HashMap::new(),
                groups: HashMap::new(),
            }),
        }
    }

    pub async fn identify_master(&self, username: &str) -> ResponseCode {
        let mut inner = self.inner.lock().await;
        if inner.clients.contains_key(username) {
            let err = RelayError::DuplicateUsername(username.to_string());
            debug!(username, error = %err, "identify_master rejected");
            return ResponseCode::Error;
        }
        inner.clients.insert(
            username.to_string(),
            ClientRecord { group: None },
        );
        inner.pending_slaves.insert(username.to_string(), Vec::new());
        info!(username, "client identified master");
        ResponseCode::Ok
    }

    /// Reserves a slot in the pending-slaves list for `username`. The caller
    /// still owns the `ConnWriter`; it's handed in via `push_pending_slave`
    /// only after the OK response has been sent on this connection (once
    /// that happens, this task no longer owns a writer for it).
    pub async fn join_slave(&self, username: &str) -> ResponseCode {
        let inner = self.inner.lock().await;
        if inner.clients.contains_key(username) {
            ResponseCode::Ok
        } else {
            ResponseCode::NotExist
        }
    }

    pub async fn push_pending_slave(&self, username: &str, writer: ConnWriter) {
        let mut inner = self.inner.lock().await;
        if let Some(slaves) = inner.pending_slaves.get_mut(username) {
            slaves.push(writer);
        }
    }

    pub async fn identify_slaves(&self, username: &str) -> ResponseCode {
        let mut inner = self.inner.lock().await;
        if !inner.clients.contains_key(username) {
            return ResponseCode::NotExist;
        }
        let slaves = inner.pending_slaves.remove(username).unwrap_or_default();
        let count = slaves.len();
        inner
            .sock_pools
            .insert(username.to_string(), Arc::new(SocketPool::new(slaves)));
        info!(username, slaves = count, "client identified slaves");
        ResponseCode::Ok
    }

    pub async fn client_list(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn group_list(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn group_clients(&self, group: &str) -> Option<Vec<String>> {
        let inner = self.inner.lock().await;
        inner.groups.get(group).map(|members| {
            let mut v: Vec<String> = members.iter().cloned().collect();
            v.sort();
            v
        })
    }

    pub async fn group_create(&self, group: &str) -> ResponseCode {
        if group.is_empty() {
            return ResponseCode::Error;
        }
        let mut inner = self.inner.lock().await;
        if inner.groups.contains_key(group) {
            ResponseCode::Exists
        } else {
            inner.groups.insert(group.to_string(), HashSet::new());
            ResponseCode::Ok
        }
    }

    pub async fn group_join(&self, username: &str, group: &str) -> ResponseCode {
        let mut inner = self.inner.lock().await;
        if !inner.groups.contains_key(group) {
            return ResponseCode::Error;
        }
        inner
            .groups
            .get_mut(group)
            .unwrap()
            .insert(username.to_string());
        if let Some(record) = inner.clients.get_mut(username) {
            record.group = Some(group.to_string());
        }
        ResponseCode::Ok
    }

    pub async fn group_leave(&self, username: &str, group: &str) -> ResponseCode {
        let mut inner = self.inner.lock().await;
        let Some(members) = inner.groups.get_mut(group) else {
            return ResponseCode::Error;
        };
        if !members.remove(username) {
            return ResponseCode::NotExist;
        }
        let now_empty = members.is_empty();
        if now_empty {
            inner.groups.remove(group);
        }
        if let Some(record) = inner.clients.get_mut(username) {
            record.group = None;
        }
        ResponseCode::Ok
    }

    pub async fn group_leave_all(&self, username: &str) -> ResponseCode {
        let mut inner = self.inner.lock().await;
        let mut emptied = Vec::new();
        for (name, members) in inner.groups.iter_mut() {
            if members.remove(username) && members.is_empty() {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            inner.groups.remove(&name);
        }
        if let Some(record) = inner.clients.get_mut(username) {
            record.group = None;
        }
        ResponseCode::Ok
    }

    /// Computes how to route a data message, cloning the `Arc<SocketPool>`
    /// handles needed for delivery so the lock can be dropped before any
    /// socket I/O happens.
    pub async fn plan_delivery(&self, src: &str, msg: &Message) -> DeliveryPlan {
        let inner = self.inner.lock().await;

        let dst_group = msg.dst.as_ref().and_then(|d| d.group.as_deref());
        let dst_user = msg.dst.as_ref().and_then(|d| d.username.as_deref());

        if let Some(group) = dst_group {
            if let Some(members) = inner.groups.get(group) {
                let src_in_group = members.contains(src);
                if !src_in_group {
                    return DeliveryPlan::Silent;
                }
                let targets = members
                    .iter()
                    .filter(|m| m.as_str() != src)
                    .filter_map(|m| inner.sock_pools.get(m).map(|p| (m.clone(), Arc::clone(p))))
                    .collect();
                return DeliveryPlan::Dispatch {
                    targets,
                    reply: ResponseCode::Ok,
                };
            }
        }

        if let Some(user) = dst_user {
            if inner.clients.contains_key(user) && user != src {
                let Some(pool) = inner.sock_pools.get(user) else {
                    return DeliveryPlan::ReplyOnly(ResponseCode::Error);
                };
                return DeliveryPlan::Dispatch {
                    targets: vec![(user.to_string(), Arc::clone(pool))],
                    reply: ResponseCode::Ok,
                };
            }
        }

        if dst_user == Some(src) {
            return DeliveryPlan::ReplyOnly(ResponseCode::Error);
        }

        // `flag = ANNOUNCE` is a client-side presentation hint only (see
        // Glossary); it never substitutes for `dst` or selects a different
        // routing rule, so a `dst`-less message falls through to the same
        // "no such recipient" reply as any other unaddressed data message.
        let err = RelayError::UnknownRecipient(
            dst_user
                .or(dst_group)
                .unwrap_or("<none>")
                .to_string(),
        );
        debug!(src, error = %err, "data message has no resolvable recipient");
        DeliveryPlan::ReplyOnly(ResponseCode::Error)
    }

    /// Removes a disconnected client from every map it participates in.
    /// Only groups emptied *by this operation* are purged — a group created
    /// empty and never joined survives.
    pub async fn cleanup(&self, username: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.clients.contains_key(username) {
            return;
        }

        let mut emptied = Vec::new();
        for (name, members) in inner.groups.iter_mut() {
            if members.remove(username) && members.is_empty() {
                emptied.push(name.clone());
            }
        }
        for name in &emptied {
            inner.groups.remove(name);
        }

        inner.clients.remove(username);
        inner.sock_pools.remove(username);
        inner.pending_slaves.remove(username);
        debug!(username, groups_purged = emptied.len(), "client cleaned up");
    }
}

/// Builds the `CLIENT.LIST` / `GROUP.LIST_GROUPS` / `GROUP.LIST_CLIENTS`
/// response bodies.
pub fn names_response(names: Vec<String>) -> anyhow::Result<Message> {
    Message::response_with_body(ResponseCode::Ok, &names)
}

pub fn username_of(user: &Option<UserRef>) -> Option<&str> {
    user.as_ref().and_then(|u| u.username.as_deref())
}
