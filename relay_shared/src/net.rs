//! Wire codec: TCP connections carrying length-prefixed, JSON-encoded
//! [`Message`](crate::protocol::Message) frames.
//!
//! The original transport detected a message boundary by reading until a
//! short read came back ("whatever arrived is smaller than the buffer"),
//! which is ambiguous for payloads that happen to land exactly on a chunk
//! boundary. Every frame here is instead a 4-byte big-endian length prefix
//! followed by exactly that many bytes of JSON.

use anyhow::Context;
use bytes::{BufMut, BytesMut};
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::error::RelayError;
use crate::protocol::Message;

/// Maximum accepted frame length. Guards a corrupt or hostile length prefix
/// from causing an unbounded allocation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

async fn write_frame<W: AsyncWriteExt + Unpin>(w: &mut W, msg: &Message) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize message")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame. An EOF on the length prefix itself is
/// the ordinary "peer disconnected" case and surfaces as
/// [`RelayError::ConnectionClosed`]; an EOF mid-payload, an oversized length
/// prefix, or a payload that doesn't deserialize are all treated as a
/// malformed frame per §4.1 ("truncated stream" vs. "malformed frame").
async fn read_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> anyhow::Result<Message> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = r.read_exact(&mut len_buf).await {
        if e.kind() == ErrorKind::UnexpectedEof {
            return Err(RelayError::ConnectionClosed.into());
        }
        return Err(e).context("tcp read len");
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RelayError::MalformedFrame(format!(
            "frame length {len} exceeds maximum"
        ))
        .into());
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            RelayError::MalformedFrame("stream truncated mid-frame".to_string())
        } else {
            RelayError::Io(e)
        }
    })?;
    serde_json::from_slice(&payload)
        .map_err(|e| RelayError::MalformedFrame(e.to_string()).into())
}

/// A full-duplex connection to a peer; used for the master control socket
/// and, before splitting, for slave sockets as they're being established.
#[derive(Debug)]
pub struct Conn {
    stream: TcpStream,
}

impl Conn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Message> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independent read/write halves so the server can keep
    /// reading from a slave connection while a separate task (holding the
    /// write half via the socket pool) pushes deliveries over it.
    pub fn into_split(self) -> (ConnReader, ConnWriter) {
        let (r, w) = self.stream.into_split();
        (ConnReader { half: r }, ConnWriter { half: w })
    }
}

/// The read half of a split [`Conn`].
#[derive(Debug)]
pub struct ConnReader {
    half: OwnedReadHalf,
}

impl ConnReader {
    pub async fn recv(&mut self) -> anyhow::Result<Message> {
        read_frame(&mut self.half).await
    }
}

/// The write half of a split [`Conn`]; this is what a
/// [`SocketPool`](crate::socket_pool::SocketPool) holds per slave.
#[derive(Debug)]
pub struct ConnWriter {
    half: OwnedWriteHalf,
}

impl ConnWriter {
    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }
}

/// TCP listener wrapper, bound once by the server at startup.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(Conn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((Conn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
