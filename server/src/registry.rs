//! Connection registry tracking every client socket from accept to close
//!
//! Connections enter as Pending, get promoted to Established once the
//! credential handshake succeeds, and leave on I/O failure, EOF, or quit.
//! The registry owns each connection's write half exclusively; read halves
//! live in per-connection reader tasks owned by the event loop.

use log::{debug, info};
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;

/// Lifecycle state of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, handshake not yet completed.
    Pending,
    /// Handshake succeeded; chat and game traffic accepted.
    Established,
}

/// One client connection and the session data attached to it.
pub struct Connection {
    /// Registry handle for this connection.
    pub id: u32,
    /// Kernel-verified uid captured at accept time, if any.
    pub peer_uid: Option<u32>,
    /// Pending until the handshake promotes it.
    pub state: ConnState,
    /// Whether this connection subscribed to diagnostic broadcasts.
    pub debug: bool,
    /// Display name, resolved during the handshake. Empty while Pending.
    pub name: String,
    writer: OwnedWriteHalf,
}

impl Connection {
    /// Writes one packet (the line plus terminator) to the peer.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await
    }
}

/// Owns all live connections, keyed by a monotonically assigned id.
///
/// A handle-keyed map rather than an intrusive list: ids stay valid across
/// arbitrary removals, so the event loop can drop the entry it is currently
/// servicing without disturbing iteration over the rest.
pub struct Registry {
    conns: HashMap<u32, Connection>,
    next_id: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            conns: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a freshly accepted connection as Pending.
    pub fn insert(&mut self, writer: OwnedWriteHalf, peer_uid: Option<u32>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.conns.insert(
            id,
            Connection {
                id,
                peer_uid,
                state: ConnState::Pending,
                debug: false,
                name: String::new(),
                writer,
            },
        );
        debug!("connection {} accepted (uid {:?})", id, peer_uid);
        id
    }

    /// Marks a connection Established under the given identity.
    pub fn promote(&mut self, id: u32, name: String) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.state = ConnState::Established;
            conn.name = name;
            info!("connection {} established as {}", id, conn.name);
        }
    }

    /// Removes and returns a connection; dropping it closes the socket.
    pub fn remove(&mut self, id: u32) -> Option<Connection> {
        let conn = self.conns.remove(&id);
        if let Some(conn) = &conn {
            debug!("connection {} removed ({:?})", id, conn.state);
        }
        conn
    }

    pub fn get(&self, id: u32) -> Option<&Connection> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Connection> {
        self.conns.get_mut(&id)
    }

    /// Sends one line to one connection. Returns false when the write
    /// failed or the connection is gone; the caller decides on removal.
    pub async fn send_to(&mut self, id: u32, line: &str) -> bool {
        match self.conns.get_mut(&id) {
            Some(conn) => conn.send_line(line).await.is_ok(),
            None => false,
        }
    }

    /// Broadcasts one line to every Established connection.
    ///
    /// Returns the ids whose writes failed so the caller can unlink them.
    pub async fn broadcast(&mut self, line: &str) -> Vec<u32> {
        self.broadcast_filtered(line, |_| true).await
    }

    /// Broadcasts one line to Established connections with the debug flag.
    pub async fn broadcast_debug(&mut self, line: &str) -> Vec<u32> {
        self.broadcast_filtered(line, |conn| conn.debug).await
    }

    async fn broadcast_filtered<F>(&mut self, line: &str, keep: F) -> Vec<u32>
    where
        F: Fn(&Connection) -> bool,
    {
        let targets: Vec<u32> = self
            .conns
            .values()
            .filter(|c| c.state == ConnState::Established && keep(c))
            .map(|c| c.id)
            .collect();

        let mut failed = Vec::new();
        for id in targets {
            if let Some(conn) = self.conns.get_mut(&id) {
                if conn.send_line(line).await.is_err() {
                    failed.push(id);
                }
            }
        }
        failed
    }

    /// Display names of all Established connections, in id order.
    pub fn established_names(&self) -> Vec<String> {
        let mut ids: Vec<u32> = self
            .conns
            .values()
            .filter(|c| c.state == ConnState::Established)
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids.iter().map(|id| self.conns[id].name.clone()).collect()
    }

    /// Ids of every live connection, in id order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.conns.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
