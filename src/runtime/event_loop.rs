//! Connection dispatch loop.
//!
//! Readiness-based model: the multiplexer tells us which transports are
//! ready, then we perform non-blocking accept/read/write calls until they
//! report `WouldBlock`. All socket and file work for one worker happens on
//! the thread that calls [`EventLoop::run`]; the poll wait is the only place
//! that thread ever sleeps.
//!
//! Per-transport failures are contained: the handler's error is reported to
//! the observer and only that transport (with its window and sink) is
//! released.

use crate::config::Config;
use crate::error::{ConnectionError, TransportError};
use crate::runtime::connection::{ConnState, Connection, ConnectionRegistry};
use crate::runtime::file::FileSink;
use crate::runtime::multiplexer::{Multiplexer, ReadyEvent};
use crate::runtime::observer::{LoopEvent, Observer};
use crate::runtime::transport::{
    AcceptOutcome, ReadOutcome, Readiness, ReceiveOutcome, Transport, TransportKind, WriteOutcome,
};
use crate::runtime::{ByteWindow, TransportId, WindowPool};
use bytes::Bytes;
use mio::net::{TcpListener, UdpSocket};
use mio::Waker;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Written back to the peer after a completed transfer when acknowledgements
/// are enabled.
pub const ACKNOWLEDGEMENT: &[u8] = b"received\n";

/// Stops one or more dispatch loops from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flags: Vec<Arc<AtomicBool>>,
    wakers: Vec<Arc<Waker>>,
}

impl ShutdownHandle {
    /// Request shutdown and interrupt every loop's poll.
    pub fn shutdown(&self) {
        for flag in &self.flags {
            flag.store(true, Ordering::SeqCst);
        }
        for waker in &self.wakers {
            // A failed wake only delays exit until the next event.
            let _ = waker.wake();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flags.iter().all(|flag| flag.load(Ordering::SeqCst))
    }

    /// One handle that stops every loop behind `handles`.
    pub fn combine(handles: impl IntoIterator<Item = ShutdownHandle>) -> ShutdownHandle {
        let mut combined = ShutdownHandle {
            flags: Vec::new(),
            wakers: Vec::new(),
        };
        for handle in handles {
            combined.flags.extend(handle.flags);
            combined.wakers.extend(handle.wakers);
        }
        combined
    }
}

/// The datagram transport and its receive window.
struct DatagramEndpoint {
    transport: Transport,
    window: ByteWindow,
}

/// One worker's poll-and-dispatch loop.
pub struct EventLoop {
    worker_id: usize,
    mux: Multiplexer,
    listener: Transport,
    datagram: Option<DatagramEndpoint>,
    connections: ConnectionRegistry,
    windows: WindowPool,
    output_dir: PathBuf,
    sequence: Arc<AtomicU64>,
    acknowledge: bool,
    observer: Arc<dyn Observer>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl EventLoop {
    /// Single-worker loop bound to the configured addresses.
    pub fn bind(config: &Config, observer: Arc<dyn Observer>) -> io::Result<Self> {
        let listener = create_listener(config.listen, false)?;
        let datagram = config.datagram_listen.map(bind_datagram).transpose()?;
        Self::new(
            0,
            config,
            listener,
            datagram,
            Arc::new(AtomicU64::new(1)),
            observer,
        )
    }

    /// Build a loop around already-bound sockets.
    ///
    /// `sequence` numbers the sink files and may be shared between workers
    /// writing into the same directory.
    pub fn new(
        worker_id: usize,
        config: &Config,
        listener: std::net::TcpListener,
        datagram: Option<std::net::UdpSocket>,
        sequence: Arc<AtomicU64>,
        observer: Arc<dyn Observer>,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(&config.output_dir)?;

        let mut mux = Multiplexer::new(config.poll_capacity)?;
        let waker = Arc::new(mux.waker(TransportId::WAKER)?);

        listener.set_nonblocking(true)?;
        let mut listener = Transport::listener(TcpListener::from_std(listener));
        mux.register(TransportId::LISTENER, &mut listener, Readiness::ACCEPTABLE)?;
        observer.observe(
            worker_id,
            TransportId::LISTENER,
            &LoopEvent::Listening {
                kind: TransportKind::Listener,
                addr: listener.local_addr().map_err(into_io)?,
            },
        );

        let datagram = match datagram {
            Some(socket) => {
                socket.set_nonblocking(true)?;
                let mut transport = Transport::datagram(UdpSocket::from_std(socket));
                mux.register(TransportId::DATAGRAM, &mut transport, Readiness::READABLE)?;
                observer.observe(
                    worker_id,
                    TransportId::DATAGRAM,
                    &LoopEvent::Listening {
                        kind: TransportKind::Datagram,
                        addr: transport.local_addr().map_err(into_io)?,
                    },
                );
                Some(DatagramEndpoint {
                    transport,
                    window: ByteWindow::new(config.buffer_size),
                })
            }
            None => None,
        };

        Ok(Self {
            worker_id,
            mux,
            listener,
            datagram,
            connections: ConnectionRegistry::new(config.max_connections),
            windows: WindowPool::new(config.max_connections, config.buffer_size),
            output_dir: config.output_dir.clone(),
            sequence,
            acknowledge: config.acknowledge,
            observer,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr().map_err(into_io)
    }

    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        self.datagram
            .as_ref()
            .and_then(|d| d.transport.local_addr().ok())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flags: vec![Arc::clone(&self.shutdown)],
            wakers: vec![Arc::clone(&self.waker)],
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Number of accepted connections still open.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_registered(&self, id: TransportId) -> bool {
        self.mux.is_registered(id)
    }

    /// Current interest of `id` in the multiplexer.
    pub fn interest(&self, id: TransportId) -> Option<Readiness> {
        self.mux.interest(id)
    }

    /// Run until shutdown is requested or the listener is gone.
    pub fn run(&mut self) -> io::Result<()> {
        while self.turn(None)? {}
        Ok(())
    }

    /// One poll and dispatch round. Returns `false` once the loop has shut
    /// down and released every transport.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        if self.shutdown.load(Ordering::SeqCst) || !self.listener.is_open() {
            self.close_all();
            return Ok(false);
        }

        let batch = self.mux.poll(timeout)?;
        for ReadyEvent { id, ready } in batch {
            match id {
                TransportId::LISTENER => self.accept_connections(),
                TransportId::DATAGRAM => self.receive_datagrams(),
                id => {
                    if let Err(e) = self.handle_connection_event(id, ready) {
                        self.emit(id, LoopEvent::Failed {
                            error: e.to_string(),
                        });
                        self.close(id);
                    }
                }
            }
        }

        if self.shutdown.load(Ordering::SeqCst) || !self.listener.is_open() {
            self.close_all();
            return Ok(false);
        }
        Ok(true)
    }

    /// Close an accepted connection: deregister, release its window and
    /// sink. Unknown ids are ignored, so this is safe mid-dispatch.
    pub fn close(&mut self, id: TransportId) {
        if let Some(mut conn) = self.connections.remove(id) {
            conn.close();
            self.mux.close(id, &mut conn.transport);
            self.windows.free(conn.window_idx);
            if let Some(mut sink) = conn.sink.take() {
                if let Err(e) = sink.close() {
                    self.emit(id, LoopEvent::Failed {
                        error: e.to_string(),
                    });
                }
            }
            self.emit(id, LoopEvent::Closed);
        }
    }

    fn emit(&self, id: TransportId, event: LoopEvent) {
        self.observer.observe(self.worker_id, id, &event);
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.try_accept() {
                Ok(AcceptOutcome::Accepted { transport, peer }) => self.admit(transport, peer),
                // Drained, possibly by an earlier event in this batch.
                Ok(AcceptOutcome::WouldBlock) => break,
                // The backlog may still hold connections behind this one.
                Err(ref e) if is_transient_accept_error(e) => continue,
                Err(e) => {
                    self.emit(TransportId::LISTENER, LoopEvent::Failed {
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }
    }

    fn admit(&mut self, mut transport: Transport, peer: SocketAddr) {
        if !self.connections.has_room() {
            return self.reject(&mut transport, peer, "connection limit reached".to_string());
        }

        let window_idx = match self.windows.alloc() {
            Some(idx) => idx,
            None => {
                return self.reject(&mut transport, peer, "window pool exhausted".to_string())
            }
        };

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self.output_dir.join(format!("recv-{seq}.bin"));
        let sink = match FileSink::create_new(&path) {
            Ok(sink) => sink,
            Err(e) => {
                self.windows.free(window_idx);
                return self.reject(&mut transport, peer, e.to_string());
            }
        };

        let id = match self
            .connections
            .insert(Connection::new(transport, peer, window_idx, sink))
        {
            Ok(id) => id,
            Err(mut conn) => {
                self.windows.free(window_idx);
                if let Some(mut sink) = conn.sink.take() {
                    let _ = sink.close();
                }
                return self.reject(&mut conn.transport, peer, "connection limit reached".to_string());
            }
        };

        let registered = match self.connections.get_mut(id) {
            Some(conn) => self.mux.register(id, &mut conn.transport, Readiness::READABLE),
            None => return,
        };
        self.emit(id, LoopEvent::Accepted { peer, path });

        if let Err(e) = registered {
            self.emit(id, LoopEvent::Failed {
                error: e.to_string(),
            });
            self.close(id);
        }
    }

    fn reject(&mut self, transport: &mut Transport, peer: SocketAddr, reason: String) {
        transport.close();
        self.emit(TransportId::LISTENER, LoopEvent::Rejected { peer, reason });
    }

    fn handle_connection_event(
        &mut self,
        id: TransportId,
        ready: Readiness,
    ) -> Result<(), ConnectionError> {
        let state = match self.connections.get(id) {
            Some(conn) => conn.state,
            // Closed earlier in this batch.
            None => return Ok(()),
        };

        match state {
            ConnState::Reading if ready.is_readable() => self.handle_readable(id),
            ConnState::Acknowledging { .. } if ready.is_writable() => self.handle_writable(id),
            _ => Ok(()),
        }
    }

    /// Drain the transport into its sink until it would block or ends.
    fn handle_readable(&mut self, id: TransportId) -> Result<(), ConnectionError> {
        loop {
            let conn = self.connections.get_mut(id).ok_or_else(not_found)?;
            let window = self.windows.get_mut(conn.window_idx);

            match conn.transport.try_read(window)? {
                ReadOutcome::Read(n) => {
                    window.flip();
                    if let Some(sink) = conn.sink.as_mut() {
                        sink.drain(window)?;
                    }
                    window.clear();
                    self.observer
                        .observe(self.worker_id, id, &LoopEvent::Received { bytes: n });
                }
                ReadOutcome::WouldBlock => return Ok(()),
                ReadOutcome::EndOfStream => return self.finish(id),
            }
        }
    }

    /// Peer is done sending: close the sink, then acknowledge or close.
    fn finish(&mut self, id: TransportId) -> Result<(), ConnectionError> {
        let conn = self.connections.get_mut(id).ok_or_else(not_found)?;
        if let Some(mut sink) = conn.sink.take() {
            sink.close()?;
            self.observer.observe(
                self.worker_id,
                id,
                &LoopEvent::Completed {
                    peer: conn.peer,
                    path: sink.path().to_path_buf(),
                    bytes: sink.written(),
                },
            );
        }

        if !self.acknowledge {
            self.close(id);
            return Ok(());
        }

        conn.start_acknowledging(ACKNOWLEDGEMENT.len());
        self.mux
            .register(id, &mut conn.transport, Readiness::WRITABLE)?;
        self.handle_writable(id)
    }

    /// Write the acknowledgement, one window at a time, resuming after
    /// partial writes.
    fn handle_writable(&mut self, id: TransportId) -> Result<(), ConnectionError> {
        loop {
            let conn = self.connections.get_mut(id).ok_or_else(not_found)?;
            let (written, total) = match conn.state {
                ConnState::Acknowledging { written, total } => (written, total),
                _ => return Ok(()),
            };

            let window = self.windows.get_mut(conn.window_idx);
            window.clear();
            let end = total.min(written + window.capacity());
            window.put(&ACKNOWLEDGEMENT[written..end])?;
            window.flip();

            match conn.transport.try_write(window)? {
                WriteOutcome::Written(n) => {
                    if conn.acknowledged(n) {
                        self.emit(id, LoopEvent::Acknowledged { bytes: total });
                        self.close(id);
                        return Ok(());
                    }
                }
                WriteOutcome::WouldBlock => return Ok(()),
            }
        }
    }

    fn receive_datagrams(&mut self) {
        let failure = {
            let endpoint = match self.datagram.as_mut() {
                Some(endpoint) => endpoint,
                None => return,
            };
            loop {
                endpoint.window.clear();
                match endpoint.transport.try_receive(&mut endpoint.window) {
                    Ok(ReceiveOutcome::Received { peer, .. }) => {
                        endpoint.window.flip();
                        let payload = Bytes::copy_from_slice(endpoint.window.readable());
                        self.observer.observe(
                            self.worker_id,
                            TransportId::DATAGRAM,
                            &LoopEvent::Datagram { peer, payload },
                        );
                    }
                    Ok(ReceiveOutcome::WouldBlock) => break None,
                    Err(e) => break Some(e),
                }
            }
        };

        if let Some(e) = failure {
            self.emit(TransportId::DATAGRAM, LoopEvent::Failed {
                error: e.to_string(),
            });
            if let Some(mut endpoint) = self.datagram.take() {
                self.mux.close(TransportId::DATAGRAM, &mut endpoint.transport);
                self.emit(TransportId::DATAGRAM, LoopEvent::Closed);
            }
        }
    }

    /// Release every transport. Idempotent.
    fn close_all(&mut self) {
        for id in self.connections.ids() {
            self.close(id);
        }
        if let Some(mut endpoint) = self.datagram.take() {
            self.mux.close(TransportId::DATAGRAM, &mut endpoint.transport);
            self.emit(TransportId::DATAGRAM, LoopEvent::Closed);
        }
        if self.listener.is_open() {
            self.mux.close(TransportId::LISTENER, &mut self.listener);
            self.emit(TransportId::LISTENER, LoopEvent::Closed);
            self.emit(TransportId::LISTENER, LoopEvent::Shutdown);
        }
    }
}

fn not_found() -> ConnectionError {
    io::Error::new(io::ErrorKind::NotFound, "connection not found").into()
}

/// Accept failures that concern a single queued connection, not the
/// listener.
fn is_transient_accept_error(err: &TransportError) -> bool {
    match err {
        TransportError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}

fn into_io(err: TransportError) -> io::Error {
    match err {
        TransportError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::NotConnected, other),
    }
}

/// Create a non-blocking TCP listener, optionally with SO_REUSEPORT so
/// several workers can share one address.
pub fn create_listener(addr: SocketAddr, reuse_port: bool) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

/// Bind a non-blocking UDP socket.
pub fn bind_datagram(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::file::tests::scratch_dir;
    use crate::runtime::observer::RecordingObserver;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpStream};

    fn test_config(name: &str) -> Config {
        Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            output_dir: scratch_dir(name),
            ..Config::default()
        }
    }

    fn start(config: &Config) -> (EventLoop, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let event_loop = EventLoop::bind(config, observer.clone()).unwrap();
        (event_loop, observer)
    }

    fn drive_until(
        event_loop: &mut EventLoop,
        observer: &RecordingObserver,
        done: impl Fn(&[(TransportId, LoopEvent)]) -> bool,
    ) {
        for _ in 0..250 {
            if done(&observer.events()) {
                return;
            }
            assert!(event_loop.turn(Some(Duration::from_millis(20))).unwrap());
        }
        panic!("loop never reached expected state: {:?}", observer.events());
    }

    fn has_kind(events: &[(TransportId, LoopEvent)], kind: &str) -> bool {
        events.iter().any(|(_, e)| e.kind() == kind)
    }

    fn accepted_id(observer: &RecordingObserver) -> TransportId {
        observer
            .events()
            .into_iter()
            .find(|(_, e)| e.kind() == "accepted")
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn test_stream_written_to_sink() {
        let config = test_config("loop-stream");
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        let client_addr = client.local_addr().unwrap();
        client.write_all(b"hel").unwrap();
        client.flush().unwrap();
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "received"));
        client.write_all(b"lo").unwrap();
        drop(client);

        drive_until(&mut event_loop, &observer, |e| has_kind(e, "closed"));

        let path = config.output_dir.join("recv-1.bin");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(observer.events().iter().any(|(_, e)| matches!(
            e,
            LoopEvent::Completed { bytes: 5, path: p, peer } if p == &path && *peer == client_addr
        )));
        assert_eq!(event_loop.connection_count(), 0);
        assert!(event_loop.is_registered(TransportId::LISTENER));
    }

    #[test]
    fn test_close_before_any_read() {
        let config = test_config("loop-cancel");
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "accepted"));
        let id = accepted_id(&observer);
        assert_eq!(event_loop.interest(id), Some(Readiness::READABLE));

        event_loop.close(id);
        event_loop.close(id);
        assert!(!event_loop.is_registered(id));
        assert!(event_loop.is_registered(TransportId::LISTENER));
        assert_eq!(event_loop.connection_count(), 0);

        // Late traffic from the peer must not reach a released connection.
        let _ = client.write_all(b"late");
        for _ in 0..3 {
            assert!(event_loop.turn(Some(Duration::from_millis(20))).unwrap());
        }
        assert!(!has_kind(&observer.events(), "failed"));
        assert_eq!(
            observer
                .events_for(id)
                .iter()
                .filter(|e| **e == LoopEvent::Closed)
                .count(),
            1
        );
    }

    #[test]
    fn test_reset_connection_closes_only_itself() {
        let config = test_config("loop-reset");
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.local_addr().unwrap();

        let _keeper = TcpStream::connect(addr).unwrap();
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "accepted"));
        let keeper_id = accepted_id(&observer);

        let mut victim = TcpStream::connect(addr).unwrap();
        victim.write_all(b"x").unwrap();
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "received"));
        let victim_id = observer
            .events()
            .into_iter()
            .find(|(_, e)| e.kind() == "received")
            .map(|(id, _)| id)
            .unwrap();
        assert_ne!(victim_id, keeper_id);

        // Zero linger turns the close into a reset.
        let victim = socket2::Socket::from(victim);
        victim.set_linger(Some(Duration::ZERO)).unwrap();
        drop(victim);

        drive_until(&mut event_loop, &observer, |e| {
            e.iter().any(|(id, ev)| *id == victim_id && *ev == LoopEvent::Closed)
        });

        let kinds: Vec<&str> = observer
            .events_for(victim_id)
            .iter()
            .map(LoopEvent::kind)
            .collect();
        let failed = kinds.iter().position(|k| *k == "failed").unwrap();
        let closed = kinds.iter().position(|k| *k == "closed").unwrap();
        assert!(failed < closed);
        assert!(!kinds.contains(&"completed"));

        assert_eq!(event_loop.connection_count(), 1);
        assert!(event_loop.is_registered(keeper_id));
        assert!(!event_loop.is_registered(victim_id));
        assert!(event_loop.is_registered(TransportId::LISTENER));
        for _ in 0..3 {
            assert!(event_loop.turn(Some(Duration::from_millis(10))).unwrap());
        }
    }

    #[test]
    fn test_peer_disconnects_immediately() {
        let config = test_config("loop-hangup");
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.local_addr().unwrap();

        drop(TcpStream::connect(addr).unwrap());
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "closed"));

        assert_eq!(event_loop.connection_count(), 0);
        assert!(event_loop.is_registered(TransportId::LISTENER));
    }

    #[test]
    fn test_acknowledgement_spans_windows() {
        let mut config = test_config("loop-ack");
        config.acknowledge = true;
        config.buffer_size = 4;
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"some payload").unwrap();
            stream.shutdown(Shutdown::Write).unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).unwrap();
            reply
        });

        drive_until(&mut event_loop, &observer, |e| has_kind(e, "closed"));
        assert_eq!(client.join().unwrap(), "received\n");
        assert!(observer.events().iter().any(|(_, e)| matches!(
            e,
            LoopEvent::Acknowledged { bytes } if *bytes == ACKNOWLEDGEMENT.len()
        )));
        assert_eq!(
            std::fs::read(config.output_dir.join("recv-1.bin")).unwrap(),
            b"some payload"
        );
    }

    #[test]
    fn test_existing_sink_rejects_only_that_connection() {
        let config = test_config("loop-exists");
        std::fs::write(config.output_dir.join("recv-1.bin"), b"keep").unwrap();
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.local_addr().unwrap();

        let _first = TcpStream::connect(addr).unwrap();
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "rejected"));
        assert_eq!(
            std::fs::read(config.output_dir.join("recv-1.bin")).unwrap(),
            b"keep"
        );

        let mut second = TcpStream::connect(addr).unwrap();
        second.write_all(b"next").unwrap();
        drop(second);
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "completed"));
        assert_eq!(
            std::fs::read(config.output_dir.join("recv-2.bin")).unwrap(),
            b"next"
        );
    }

    #[test]
    fn test_connection_limit() {
        let mut config = test_config("loop-limit");
        config.max_connections = 1;
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.local_addr().unwrap();

        let _first = TcpStream::connect(addr).unwrap();
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "accepted"));
        let _second = TcpStream::connect(addr).unwrap();
        drive_until(&mut event_loop, &observer, |e| has_kind(e, "rejected"));

        assert!(observer.events().iter().any(|(_, e)| matches!(
            e,
            LoopEvent::Rejected { reason, .. } if reason == "connection limit reached"
        )));
        assert_eq!(event_loop.connection_count(), 1);
    }

    #[test]
    fn test_datagram_reported() {
        let mut config = test_config("loop-datagram");
        config.datagram_listen = Some("127.0.0.1:0".parse().unwrap());
        let (mut event_loop, observer) = start(&config);
        let addr = event_loop.datagram_addr().unwrap();

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"ping", addr).unwrap();

        drive_until(&mut event_loop, &observer, |e| has_kind(e, "datagram"));
        let events = observer.events_for(TransportId::DATAGRAM);
        assert!(events.iter().any(|e| matches!(
            e,
            LoopEvent::Datagram { peer, payload }
                if *peer == client.local_addr().unwrap() && &payload[..] == b"ping"
        )));
    }

    #[test]
    fn test_transient_accept_errors() {
        let aborted = TransportError::Io(io::Error::from(io::ErrorKind::ConnectionAborted));
        let interrupted = TransportError::Io(io::Error::from(io::ErrorKind::Interrupted));
        let refused = TransportError::Io(io::Error::from(io::ErrorKind::PermissionDenied));

        assert!(is_transient_accept_error(&aborted));
        assert!(is_transient_accept_error(&interrupted));
        assert!(!is_transient_accept_error(&refused));
        assert!(!is_transient_accept_error(&TransportError::Closed));
    }

    #[test]
    fn test_empty_poll_times_out() {
        let config = test_config("loop-idle");
        let (mut event_loop, observer) = start(&config);

        assert!(event_loop.turn(Some(Duration::from_millis(10))).unwrap());
        assert_eq!(observer.events().len(), 1);
        assert_eq!(observer.events()[0].1.kind(), "listening");
    }

    #[test]
    fn test_shutdown_from_other_thread() {
        let config = test_config("loop-shutdown");
        let (mut event_loop, observer) = start(&config);
        let handle = event_loop.shutdown_handle();
        assert!(!handle.is_shutdown());

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.shutdown();
            handle
        });

        event_loop.run().unwrap();
        assert!(stopper.join().unwrap().is_shutdown());
        assert!(!event_loop.is_registered(TransportId::LISTENER));
        assert!(has_kind(&observer.events(), "shutdown"));
        assert!(!event_loop.turn(Some(Duration::ZERO)).unwrap());
    }
}
