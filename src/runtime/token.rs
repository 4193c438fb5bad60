//! Transport identifiers and their mapping to poll tokens.
//!
//! Accepted connections get the slab key of their registry slot as id.
//! The top of the id space is reserved for the per-worker singletons.

use mio::Token;
use std::fmt;

/// Unique identifier of a transport within one dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub usize);

impl TransportId {
    /// The listening stream transport.
    pub const LISTENER: TransportId = TransportId(usize::MAX);
    /// The datagram transport, when enabled.
    pub const DATAGRAM: TransportId = TransportId(usize::MAX - 1);
    /// Shutdown waker; never owns a transport.
    pub const WAKER: TransportId = TransportId(usize::MAX - 2);

    /// Whether this id belongs to an accepted connection.
    pub fn is_connection(self) -> bool {
        self.0 < Self::WAKER.0
    }

    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for TransportId {
    fn from(token: Token) -> Self {
        TransportId(token.0)
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LISTENER => write!(f, "listener"),
            Self::DATAGRAM => write!(f, "datagram"),
            Self::WAKER => write!(f, "waker"),
            TransportId(id) => write!(f, "{id}"),
        }
    }
}
