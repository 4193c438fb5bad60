//! Connection state machine and registry.
//!
//! Each accepted connection owns its transport, a pool window and the file
//! sink its bytes go to:
//!
//! ```text
//! Reading --EndOfStream--> Acknowledging --ack written--> Closing
//!    |                                                       ^
//!    +------------------ EndOfStream (no ack) / error -------+
//! ```

use crate::runtime::file::FileSink;
use crate::runtime::transport::Transport;
use crate::runtime::TransportId;
use slab::Slab;
use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Registered for read; bytes go to the sink.
    Reading,
    /// Peer finished sending; writing the acknowledgement back.
    Acknowledging {
        /// Bytes already written.
        written: usize,
        /// Total bytes to write.
        total: usize,
    },
    /// Connection is being closed.
    Closing,
}

/// A single accepted connection.
#[derive(Debug)]
pub struct Connection {
    pub transport: Transport,
    pub peer: SocketAddr,
    /// Index of this connection's window in the worker's pool.
    pub window_idx: usize,
    /// `None` once the sink has been closed.
    pub sink: Option<FileSink>,
    pub state: ConnState,
}

impl Connection {
    /// Create a new connection in the reading state.
    pub fn new(transport: Transport, peer: SocketAddr, window_idx: usize, sink: FileSink) -> Self {
        Self {
            transport,
            peer,
            window_idx,
            sink: Some(sink),
            state: ConnState::Reading,
        }
    }

    /// Transition to acknowledging `total` bytes.
    pub fn start_acknowledging(&mut self, total: usize) {
        self.state = ConnState::Acknowledging { written: 0, total };
    }

    /// Record `n` more acknowledgement bytes written. Returns `true` once
    /// the whole acknowledgement is out.
    pub fn acknowledged(&mut self, n: usize) -> bool {
        if let ConnState::Acknowledging { written, total } = &mut self.state {
            *written += n;
            *written >= *total
        } else {
            false
        }
    }

    /// Mark connection for closing.
    pub fn close(&mut self) {
        self.state = ConnState::Closing;
    }
}

/// Registry of active connections using slab allocation.
///
/// The slab key doubles as the connection's [`TransportId`].
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Whether another connection can be inserted.
    pub fn has_room(&self) -> bool {
        self.connections.len() < self.max_connections
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Result<TransportId, Connection> {
        if !self.has_room() {
            return Err(conn);
        }
        Ok(TransportId(self.connections.insert(conn)))
    }

    pub fn get(&self, id: TransportId) -> Option<&Connection> {
        self.connections.get(id.0)
    }

    pub fn get_mut(&mut self, id: TransportId) -> Option<&mut Connection> {
        self.connections.get_mut(id.0)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: TransportId) -> Option<Connection> {
        self.connections.try_remove(id.0)
    }

    pub fn contains(&self, id: TransportId) -> bool {
        self.connections.contains(id.0)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Ids of every live connection.
    pub fn ids(&self) -> Vec<TransportId> {
        self.connections.iter().map(|(key, _)| TransportId(key)).collect()
    }
}
