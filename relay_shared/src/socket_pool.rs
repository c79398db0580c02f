//! Bounded pool of interchangeable connections to one peer.
//!
//! Grounded on the original `SocketPool`: a `Semaphore` bounds concurrent
//! acquisition, a `Mutex`-guarded vector holds the slots. Here the semaphore
//! permit and the slot are held for the duration of a single send, so
//! release-and-wake-a-waiter falls out of Rust's ordinary scoping instead of
//! needing a manual release call.

use anyhow::Context;
use tokio::sync::{Mutex, Semaphore};

use crate::net::ConnWriter;
use crate::protocol::Message;

/// A fixed set of write-only connections to one client's slave sockets.
pub struct SocketPool {
    semaphore: Semaphore,
    slots: Mutex<Vec<Option<ConnWriter>>>,
    capacity: usize,
}

impl SocketPool {
    /// Builds a pool from the slave write-halves collected during this
    /// client's `JOIN_SLAVE` sequence. A pool with zero slaves is legal to
    /// construct (see the `IDENTIFY_SLAVES`-with-zero-slaves note); it will
    /// simply never grant a permit, so any send to it blocks forever.
    pub fn new(slaves: Vec<ConnWriter>) -> Self {
        let n = slaves.len();
        Self {
            semaphore: Semaphore::new(n),
            slots: Mutex::new(slaves.into_iter().map(Some).collect()),
            capacity: n,
        }
    }

    /// Number of currently-available (not-in-use) slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquires a free slot, writes `msg` over it, and returns it to the
    /// pool. Blocks until a slot is free.
    pub async fn send(&self, msg: &Message) -> anyhow::Result<()> {
        let _permit = self.semaphore.acquire().await.context("socket pool closed")?;

        let (idx, mut writer) = {
            let mut slots = self.slots.lock().await;
            let idx = slots
                .iter()
                .position(|s| s.is_some())
                .context("socket pool invariant violated: permit granted with no free slot")?;
            (idx, slots[idx].take().unwrap())
        };

        let result = writer.send(msg).await;

        let mut slots = self.slots.lock().await;
        slots[idx] = Some(writer);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Conn, Listener};
    use crate::protocol::{MessageType, UserRef};
    use tokio::net::TcpStream;

    async fn writer_pair() -> (ConnWriter, Conn) {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_conn, _) = listener.accept().await.unwrap();
        let client_stream = client.await.unwrap();
        let (_, writer) = server_conn.into_split();
        (writer, Conn::new(client_stream))
    }

    #[tokio::test]
    async fn send_round_trips_through_a_single_slot() {
        let (writer, mut reader_conn) = writer_pair().await;
        let pool = SocketPool::new(vec![writer]);
        assert_eq!(pool.available(), 1);

        let msg = Message::data(MessageType::PlainText, None, None, None, b"hi".to_vec());
        pool.send(&msg).await.unwrap();

        let received = reader_conn.recv().await.unwrap();
        assert_eq!(received, msg);
        assert_eq!(pool.available(), 1, "permit returned after send completes");
    }

    #[tokio::test]
    async fn concurrent_sends_are_serialized_over_one_slot() {
        let (writer, mut reader_conn) = writer_pair().await;
        let pool = SocketPool::new(vec![writer]);

        let msg_a = Message::data(MessageType::PlainText, Some(UserRef::named("a")), None, None, vec![]);
        let msg_b = Message::data(MessageType::PlainText, Some(UserRef::named("b")), None, None, vec![]);

        let (ra, rb) = tokio::join!(pool.send(&msg_a), pool.send(&msg_b));
        ra.unwrap();
        rb.unwrap();

        let first = reader_conn.recv().await.unwrap();
        let second = reader_conn.recv().await.unwrap();
        let received: Vec<_> = vec![first, second];
        assert!(received.contains(&msg_a));
        assert!(received.contains(&msg_b));
    }
}
