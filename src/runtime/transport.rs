//! Non-blocking transports.
//!
//! One [`Transport`] type covers every endpoint kind the server touches:
//!
//! - `Listener`: accepts stream connections (capability: acceptable)
//! - `Stream`: an accepted connection (readable + writable)
//! - `Datagram`: a UDP socket, peer address per message (readable + writable)
//!
//! No call here ever blocks. "Nothing to do right now" is reported as a
//! `WouldBlock` outcome, and a peer half-close as `EndOfStream`; neither is
//! an error.

use crate::error::TransportError;
use crate::runtime::ByteWindow;
use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::ops::BitOr;

/// A set of readiness capabilities: what a transport can do, what it is
/// registered for, or what it is ready for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    acceptable: bool,
    readable: bool,
    writable: bool,
}

impl Readiness {
    pub const EMPTY: Readiness = Readiness {
        acceptable: false,
        readable: false,
        writable: false,
    };
    pub const ACCEPTABLE: Readiness = Readiness {
        acceptable: true,
        readable: false,
        writable: false,
    };
    pub const READABLE: Readiness = Readiness {
        acceptable: false,
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Readiness = Readiness {
        acceptable: false,
        readable: false,
        writable: true,
    };

    pub fn is_acceptable(self) -> bool {
        self.acceptable
    }

    pub fn is_readable(self) -> bool {
        self.readable
    }

    pub fn is_writable(self) -> bool {
        self.writable
    }

    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }

    /// Whether every capability in `other` is also in `self`.
    pub fn contains(self, other: Readiness) -> bool {
        (self.acceptable || !other.acceptable)
            && (self.readable || !other.readable)
            && (self.writable || !other.writable)
    }

    /// Capabilities present in both sets.
    pub fn intersection(self, other: Readiness) -> Readiness {
        Readiness {
            acceptable: self.acceptable && other.acceptable,
            readable: self.readable && other.readable,
            writable: self.writable && other.writable,
        }
    }

    /// The poll interest that delivers these capabilities. Accept readiness
    /// is reported by the OS as read readiness on the listening socket.
    pub(crate) fn to_interest(self) -> Option<Interest> {
        let read = self.acceptable || self.readable;
        match (read, self.writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for Readiness {
    type Output = Readiness;

    fn bitor(self, rhs: Readiness) -> Readiness {
        Readiness {
            acceptable: self.acceptable || rhs.acceptable,
            readable: self.readable || rhs.readable,
            writable: self.writable || rhs.writable,
        }
    }
}

/// Endpoint kind of a transport. Survives `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Listener,
    Stream,
    Datagram,
}

impl TransportKind {
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Listener => "listener",
            TransportKind::Stream => "stream",
            TransportKind::Datagram => "datagram",
        }
    }

    pub fn capabilities(self) -> Readiness {
        match self {
            TransportKind::Listener => Readiness::ACCEPTABLE,
            TransportKind::Stream | TransportKind::Datagram => {
                Readiness::READABLE | Readiness::WRITABLE
            }
        }
    }
}

/// Result of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes placed into the window; `0` only when the window had no room.
    Read(usize),
    WouldBlock,
    /// The peer closed its write side.
    EndOfStream,
}

/// Result of a non-blocking write or send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes taken from the window; may be fewer than were available.
    Written(usize),
    WouldBlock,
}

/// Result of a non-blocking datagram receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Received { len: usize, peer: SocketAddr },
    WouldBlock,
}

/// Result of a non-blocking accept.
#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted {
        transport: Transport,
        peer: SocketAddr,
    },
    WouldBlock,
}

#[derive(Debug)]
enum Endpoint {
    Listener(TcpListener),
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// A non-blocking network endpoint.
///
/// `close()` is idempotent; every other operation on a closed transport
/// fails with [`TransportError::Closed`].
#[derive(Debug)]
pub struct Transport {
    kind: TransportKind,
    endpoint: Option<Endpoint>,
}

impl Transport {
    pub fn listener(listener: TcpListener) -> Self {
        Self {
            kind: TransportKind::Listener,
            endpoint: Some(Endpoint::Listener(listener)),
        }
    }

    pub fn stream(stream: TcpStream) -> Self {
        Self {
            kind: TransportKind::Stream,
            endpoint: Some(Endpoint::Stream(stream)),
        }
    }

    pub fn datagram(socket: UdpSocket) -> Self {
        Self {
            kind: TransportKind::Datagram,
            endpoint: Some(Endpoint::Datagram(socket)),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn capabilities(&self) -> Readiness {
        self.kind.capabilities()
    }

    pub fn is_open(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(match self.endpoint()? {
            Endpoint::Listener(l) => l.local_addr()?,
            Endpoint::Stream(s) => s.local_addr()?,
            Endpoint::Datagram(d) => d.local_addr()?,
        })
    }

    /// Read into the free part of `window` (fill mode), advancing its
    /// position by the bytes read.
    pub fn try_read(&mut self, window: &mut ByteWindow) -> Result<ReadOutcome, TransportError> {
        if !window.has_remaining() {
            // A zero-length read would be indistinguishable from EOF.
            self.endpoint()?;
            return Ok(ReadOutcome::Read(0));
        }

        let result = loop {
            let res = match self.endpoint_mut()? {
                Endpoint::Stream(s) => s.read(window.writable_mut()),
                Endpoint::Datagram(d) => d.recv(window.writable_mut()),
                Endpoint::Listener(_) => return Err(unsupported(TransportKind::Listener, "read")),
            };
            match res {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) if self.kind == TransportKind::Stream => Ok(ReadOutcome::EndOfStream),
            Ok(n) => {
                window.advance(n).map_err(invalid_data)?;
                Ok(ReadOutcome::Read(n))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the readable part of `window` (drain mode), advancing its
    /// position by the bytes written. The caller resumes from the new
    /// position after a partial write.
    pub fn try_write(&mut self, window: &mut ByteWindow) -> Result<WriteOutcome, TransportError> {
        if !window.has_remaining() {
            self.endpoint()?;
            return Ok(WriteOutcome::Written(0));
        }

        let result = loop {
            let res = match self.endpoint_mut()? {
                Endpoint::Stream(s) => s.write(window.readable()),
                Endpoint::Datagram(d) => d.send(window.readable()),
                Endpoint::Listener(_) => return Err(unsupported(TransportKind::Listener, "write")),
            };
            match res {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0").into()),
            Ok(n) => {
                window.advance(n).map_err(invalid_data)?;
                Ok(WriteOutcome::Written(n))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Send the readable part of `window` as one datagram to `peer`.
    pub fn try_send(
        &mut self,
        window: &mut ByteWindow,
        peer: SocketAddr,
    ) -> Result<WriteOutcome, TransportError> {
        let kind = self.kind;
        let socket = match self.endpoint_mut()? {
            Endpoint::Datagram(d) => d,
            _ => return Err(unsupported(kind, "send")),
        };

        match socket.send_to(window.readable(), peer) {
            Ok(n) => {
                window.advance(n).map_err(invalid_data)?;
                Ok(WriteOutcome::Written(n))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Receive one datagram into the free part of `window`. Bytes beyond the
    /// window's room are discarded by the OS.
    pub fn try_receive(
        &mut self,
        window: &mut ByteWindow,
    ) -> Result<ReceiveOutcome, TransportError> {
        let kind = self.kind;
        let socket = match self.endpoint_mut()? {
            Endpoint::Datagram(d) => d,
            _ => return Err(unsupported(kind, "receive")),
        };

        match socket.recv_from(window.writable_mut()) {
            Ok((len, peer)) => {
                window.advance(len).map_err(invalid_data)?;
                Ok(ReceiveOutcome::Received { len, peer })
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReceiveOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Accept one pending connection as a non-blocking stream transport.
    pub fn try_accept(&mut self) -> Result<AcceptOutcome, TransportError> {
        let kind = self.kind;
        let listener = match self.endpoint_mut()? {
            Endpoint::Listener(l) => l,
            _ => return Err(unsupported(kind, "accept")),
        };

        match listener.accept() {
            Ok((stream, peer)) => Ok(AcceptOutcome::Accepted {
                transport: Transport::stream(stream),
                peer,
            }),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(AcceptOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Release the OS resources. Calling it again has no effect.
    pub fn close(&mut self) {
        if let Some(Endpoint::Stream(stream)) = self.endpoint.take() {
            // Best effort; the peer may already be gone.
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn endpoint(&self) -> Result<&Endpoint, TransportError> {
        self.endpoint.as_ref().ok_or(TransportError::Closed)
    }

    fn endpoint_mut(&mut self) -> Result<&mut Endpoint, TransportError> {
        self.endpoint.as_mut().ok_or(TransportError::Closed)
    }
}

fn unsupported(kind: TransportKind, op: &'static str) -> TransportError {
    TransportError::Unsupported {
        op,
        kind: kind.name(),
    }
}

fn invalid_data(err: crate::error::WindowError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}

impl Source for Transport {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self.endpoint.as_mut().ok_or_else(closed)? {
            Endpoint::Listener(l) => l.register(registry, token, interests),
            Endpoint::Stream(s) => s.register(registry, token, interests),
            Endpoint::Datagram(d) => d.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self.endpoint.as_mut().ok_or_else(closed)? {
            Endpoint::Listener(l) => l.reregister(registry, token, interests),
            Endpoint::Stream(s) => s.reregister(registry, token, interests),
            Endpoint::Datagram(d) => d.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self.endpoint.as_mut().ok_or_else(closed)? {
            Endpoint::Listener(l) => l.deregister(registry),
            Endpoint::Stream(s) => s.deregister(registry),
            Endpoint::Datagram(d) => d.deregister(registry),
        }
    }
}
