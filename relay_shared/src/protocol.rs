//! Protocol-level types shared by client and server: message envelope,
//! user references, and the instruction/data code enumerations.
//!
//! `MessageType` carries explicit discriminants so the numeric ranges named
//! in the wire contract stay visible in the source, even though messages are
//! serialized as a tagged union rather than a raw integer.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Instruction and data codes. Discriminants below 1000 are data payloads;
/// 1000 and above are control instructions. `is_instruction`/`is_data`
/// below are what the handler actually uses to classify a message — the
/// numeric values exist to keep the documented ranges load-bearing in code.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Null = 100,
    PlainText = 101,
    Object = 102,
    Image = 103,
    Video = 104,
    Voice = 105,
    File = 106,

    IdentifyMaster = 1000,
    JoinSlave = 1001,
    IdentifySlaves = 1002,
    Response = 1003,
    ClientList = 2000,
    ClientRename = 2001,
    GroupListGroups = 3000,
    GroupListClients = 3001,
    GroupCreate = 3002,
    GroupJoin = 3003,
    GroupLeave = 3004,
    GroupLeaveAll = 3005,
    BroadcastServerDisc = 4000,
    BroadcastClientDisc = 4001,
}

impl MessageType {
    pub fn is_instruction(self) -> bool {
        (self as u16) >= 1000
    }

    pub fn is_data(self) -> bool {
        !self.is_instruction()
    }
}

/// Response codes carried by `MessageType::Response` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    Ok = 200,
    Warn = 400,
    NotExist = 404,
    Error = 500,
    Exists = 501,
}

/// A message flag. Only `Announce` exists today; modeled as an enum (not a
/// bool) so a future flag doesn't require changing the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageFlag {
    Announce,
}

/// A reference to a user as carried on the wire: who a message is from, or
/// who/what it's addressed to. Never carries socket handles — those live
/// only in the server's registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub username: Option<String>,
    pub group: Option<String>,
    pub address: Option<SocketAddr>,
}

impl UserRef {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            group: None,
            address: None,
        }
    }

    pub fn for_group(group: impl Into<String>) -> Self {
        Self {
            username: None,
            group: Some(group.into()),
            address: None,
        }
    }
}

/// The message envelope exchanged over the wire. `body` is an opaque byte
/// payload; helpers below serialize/deserialize it lazily so callers who
/// only care about routing fields never pay for a body decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub src: Option<UserRef>,
    pub dst: Option<UserRef>,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub response: Option<ResponseCode>,
    pub flag: Option<MessageFlag>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Message {
    /// Builds an instruction message with no body.
    pub fn instruction(msg_type: MessageType, src: Option<UserRef>) -> Self {
        Self {
            src,
            dst: None,
            msg_type,
            response: None,
            flag: None,
            body: Vec::new(),
        }
    }

    /// Builds an instruction message carrying a serialized body (e.g. a
    /// group name for `GROUP.CREATE`, or a username for `CLIENT.RENAME`).
    pub fn instruction_with_body<T: Serialize>(
        msg_type: MessageType,
        src: Option<UserRef>,
        body: &T,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            src,
            dst: None,
            msg_type,
            response: None,
            flag: None,
            body: serde_json::to_vec(body)?,
        })
    }

    /// Builds a data message (private, group, or announcement).
    pub fn data(
        msg_type: MessageType,
        src: Option<UserRef>,
        dst: Option<UserRef>,
        flag: Option<MessageFlag>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            src,
            dst,
            msg_type,
            response: None,
            flag,
            body,
        }
    }

    /// Builds a `RESPONSE` reply addressed back to `dst`.
    pub fn response(response: ResponseCode, dst: Option<UserRef>) -> Self {
        Self {
            src: None,
            dst,
            msg_type: MessageType::Response,
            response: Some(response),
            flag: None,
            body: Vec::new(),
        }
    }

    /// Builds a `RESPONSE` reply with an attached body (e.g. `CLIENT.LIST`).
    pub fn response_with_body<T: Serialize>(
        response: ResponseCode,
        body: &T,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            src: None,
            dst: None,
            msg_type: MessageType::Response,
            response: Some(response),
            flag: None,
            body: serde_json::to_vec(body)?,
        })
    }

    /// Deserializes `body` as `T`.
    pub fn body_as<T: for<'de> Deserialize<'de>>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Interprets `body` as a UTF-8 string (plain-text payloads).
    pub fn body_as_string(&self) -> anyhow::Result<String> {
        Ok(String::from_utf8(self.body.clone())?)
    }
}

/// A file payload, used by `MessageType::File` bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileProtocol {
    pub filename: String,
    pub content: Vec<u8>,
}

impl FileProtocol {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}
