//! Readiness multiplexer.
//!
//! Wraps `mio::Poll` (epoll on Linux, kqueue on macOS) together with the
//! registration table: which transport is interested in what. `poll`
//! returns an owned [`ReadySet`]; callers never touch the poll internals
//! while iterating, so closing transports mid-dispatch is safe.
//!
//! Readiness is level-evaluated per call from the caller's point of view: a
//! transport that still has unread data shows up again once more data
//! arrives. Spurious readiness is possible and must be handled by treating
//! `WouldBlock` as "nothing to do".

use crate::runtime::transport::{Readiness, Transport};
use crate::runtime::TransportId;
use mio::event::Source;
use mio::{Events, Poll, Waker};
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tracing::trace;

/// One ready transport and the subset of its interest that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub id: TransportId,
    pub ready: Readiness,
}

/// Owned result of one `poll` call.
#[derive(Debug, Default)]
pub struct ReadySet {
    events: Vec<ReadyEvent>,
    woken: bool,
}

impl ReadySet {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the waker fired during this poll.
    pub fn woken(&self) -> bool {
        self.woken
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadyEvent> {
        self.events.iter()
    }
}

impl IntoIterator for ReadySet {
    type Item = ReadyEvent;
    type IntoIter = std::vec::IntoIter<ReadyEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Waits on registered transports and reports the ready ones.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
    registrations: HashMap<TransportId, Readiness>,
    waker_id: Option<TransportId>,
}

impl Multiplexer {
    /// `capacity` bounds how many events a single `poll` can return.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
            registrations: HashMap::new(),
            waker_id: None,
        })
    }

    /// Add or replace the registration of `transport` under `id`.
    ///
    /// Interest the transport cannot offer is dropped; an interest set that
    /// ends up empty is rejected.
    pub fn register(
        &mut self,
        id: TransportId,
        transport: &mut Transport,
        interest: Readiness,
    ) -> io::Result<()> {
        let interest = interest.intersection(transport.capabilities());
        let mio_interest = interest.to_interest().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("empty interest set for {} transport", transport.kind().name()),
            )
        })?;

        let registry = self.poll.registry();
        if self.registrations.contains_key(&id) {
            transport.reregister(registry, id.token(), mio_interest)?;
        } else {
            transport.register(registry, id.token(), mio_interest)?;
        }
        self.registrations.insert(id, interest);
        trace!(transport = %id, ?interest, "registered");
        Ok(())
    }

    /// Remove the registration for `id`. Unknown ids are ignored.
    pub fn deregister(&mut self, id: TransportId, transport: &mut Transport) -> io::Result<()> {
        if self.registrations.remove(&id).is_some() && transport.is_open() {
            transport.deregister(self.poll.registry())?;
            trace!(transport = %id, "deregistered");
        }
        Ok(())
    }

    /// Deregister then close. Safe to call from inside dispatch and more
    /// than once.
    pub fn close(&mut self, id: TransportId, transport: &mut Transport) {
        if let Err(e) = self.deregister(id, transport) {
            trace!(transport = %id, error = %e, "deregister on close failed");
        }
        transport.close();
    }

    /// Current interest for `id`, if registered.
    pub fn interest(&self, id: TransportId) -> Option<Readiness> {
        self.registrations.get(&id).copied()
    }

    pub fn is_registered(&self, id: TransportId) -> bool {
        self.registrations.contains_key(&id)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Create a waker that interrupts `poll` from another thread.
    pub fn waker(&mut self, id: TransportId) -> io::Result<Waker> {
        let waker = Waker::new(self.poll.registry(), id.token())?;
        self.waker_id = Some(id);
        Ok(waker)
    }

    /// Block until at least one registered transport is ready or `timeout`
    /// elapses. `None` waits forever, `Some(Duration::ZERO)` does not wait.
    ///
    /// The result only ever contains registered transports and only the
    /// readiness they asked for.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<ReadySet> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(ReadySet::default()),
            Err(e) => return Err(e),
        }

        let mut set = ReadySet::default();
        for event in self.events.iter() {
            let id = TransportId::from(event.token());
            if Some(id) == self.waker_id {
                set.woken = true;
                continue;
            }

            let interest = match self.registrations.get(&id) {
                Some(interest) => *interest,
                None => continue,
            };

            let mut ready = Readiness::EMPTY;
            let readish = event.is_readable() || event.is_read_closed() || event.is_error();
            let writish = event.is_writable() || event.is_write_closed() || event.is_error();
            if readish {
                ready = ready | Readiness::ACCEPTABLE | Readiness::READABLE;
            }
            if writish {
                ready = ready | Readiness::WRITABLE;
            }

            let ready = ready.intersection(interest);
            if !ready.is_empty() {
                set.events.push(ReadyEvent { id, ready });
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, UdpSocket};
    use std::net::{TcpStream as StdTcpStream, UdpSocket as StdUdpSocket};
    use std::time::Instant;

    fn listener() -> (Transport, std::net::SocketAddr) {
        let l = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = l.local_addr().unwrap();
        (Transport::listener(l), addr)
    }

    fn poll_until_ready(mux: &mut Multiplexer) -> ReadySet {
        for _ in 0..50 {
            let set = mux.poll(Some(Duration::from_millis(100))).unwrap();
            if !set.is_empty() {
                return set;
            }
        }
        panic!("nothing became ready");
    }

    #[test]
    fn test_poll_with_no_registrations_times_out_empty() {
        let mut mux = Multiplexer::new(16).unwrap();
        let start = Instant::now();
        let set = mux.poll(Some(Duration::from_millis(50))).unwrap();
        assert!(set.is_empty());
        assert!(!set.woken());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_zero_timeout_does_not_wait() {
        let mut mux = Multiplexer::new(16).unwrap();
        let (mut l, _) = listener();
        mux.register(TransportId::LISTENER, &mut l, Readiness::ACCEPTABLE).unwrap();
        let set = mux.poll(Some(Duration::ZERO)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_listener_reports_acceptable_only() {
        let mut mux = Multiplexer::new(16).unwrap();
        let (mut l, addr) = listener();
        mux.register(TransportId::LISTENER, &mut l, Readiness::ACCEPTABLE).unwrap();

        let _client = StdTcpStream::connect(addr).unwrap();
        let set = poll_until_ready(&mut mux);
        let events: Vec<_> = set.into_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, TransportId::LISTENER);
        assert_eq!(events[0].ready, Readiness::ACCEPTABLE);
    }

    #[test]
    fn test_register_replaces_interest() {
        let mut mux = Multiplexer::new(16).unwrap();
        let mut d = Transport::datagram(UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let id = TransportId::DATAGRAM;

        mux.register(id, &mut d, Readiness::READABLE).unwrap();
        assert_eq!(mux.interest(id), Some(Readiness::READABLE));

        mux.register(id, &mut d, Readiness::WRITABLE).unwrap();
        assert_eq!(mux.interest(id), Some(Readiness::WRITABLE));
        assert_eq!(mux.len(), 1);

        // An idle UDP socket is immediately writable.
        let set = poll_until_ready(&mut mux);
        assert!(set.iter().all(|e| e.ready == Readiness::WRITABLE));
    }

    #[test]
    fn test_datagram_readable() {
        let mut mux = Multiplexer::new(16).unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        let mut d = Transport::datagram(socket);
        mux.register(TransportId::DATAGRAM, &mut d, Readiness::READABLE).unwrap();

        let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hi", addr).unwrap();

        let set = poll_until_ready(&mut mux);
        let event = set.iter().next().copied().unwrap();
        assert_eq!(event.id, TransportId::DATAGRAM);
        assert!(event.ready.is_readable());
        assert!(!event.ready.is_writable());
    }

    #[test]
    fn test_empty_interest_rejected() {
        let mut mux = Multiplexer::new(16).unwrap();
        let (mut l, _) = listener();
        // Listeners only offer accept readiness.
        let err = mux
            .register(TransportId::LISTENER, &mut l, Readiness::WRITABLE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!mux.is_registered(TransportId::LISTENER));
    }

    #[test]
    fn test_close_deregisters_and_is_idempotent() {
        let mut mux = Multiplexer::new(16).unwrap();
        let (mut l, addr) = listener();
        mux.register(TransportId::LISTENER, &mut l, Readiness::ACCEPTABLE).unwrap();

        mux.close(TransportId::LISTENER, &mut l);
        assert!(mux.is_empty());
        assert!(!l.is_open());
        mux.close(TransportId::LISTENER, &mut l);

        // Connection attempts are refused and nothing is reported.
        let _ = StdTcpStream::connect(addr);
        let set = mux.poll(Some(Duration::from_millis(20))).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_waker_sets_woken() {
        let mut mux = Multiplexer::new(16).unwrap();
        let waker = mux.waker(TransportId::WAKER).unwrap();
        waker.wake().unwrap();
        let set = mux.poll(Some(Duration::from_secs(1))).unwrap();
        assert!(set.woken());
        assert!(set.is_empty());
    }
}
