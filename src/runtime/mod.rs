//! Readiness-based runtime.
//!
//! - `ByteWindow` / `WindowPool`: fixed-capacity byte windows, one per connection
//! - `Transport`: non-blocking listener, stream and datagram endpoints
//! - `Multiplexer`: readiness registrations over a single mio `Poll`
//! - `EventLoop`: per-worker accept/read/write dispatch into file sinks
//!
//! With more than one worker, each runs its own loop on its own thread and
//! the kernel spreads connections across their SO_REUSEPORT listeners.

mod buffer;
mod connection;
mod event_loop;
pub mod file;
mod multiplexer;
mod observer;
mod token;
mod transport;

pub use buffer::{ByteWindow, WindowPool};
pub use connection::{ConnState, Connection, ConnectionRegistry};
pub use event_loop::{bind_datagram, create_listener, EventLoop, ShutdownHandle, ACKNOWLEDGEMENT};
pub use file::{copy, FileSink, FileSource};
pub use multiplexer::{Multiplexer, ReadyEvent, ReadySet};
pub use observer::{LoopEvent, Observer, RecordingObserver, TracingObserver};
pub use token::TransportId;
pub use transport::{
    AcceptOutcome, ReadOutcome, Readiness, ReceiveOutcome, Transport, TransportKind, WriteOutcome,
};

use crate::config::Config;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Running worker threads.
pub struct Workers {
    addr: SocketAddr,
    datagram_addr: Option<SocketAddr>,
    shutdown: ShutdownHandle,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Stream address every worker accepts on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        self.datagram_addr
    }

    /// Stops every worker.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub fn join(self) {
        for (worker_id, handle) in self.handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(worker = worker_id, "Worker panicked");
            }
        }
    }
}

/// Bind every worker's sockets and start its loop on a named thread.
///
/// Sockets are bound before any thread starts, so bind errors surface here
/// and `local_addr` is already resolved when `listen` used port 0.
pub fn spawn(config: &Config, observer: Arc<dyn Observer>) -> io::Result<Workers> {
    let workers = config.workers.max(1);
    let reuse_port = workers > 1;
    // Sink names stay unique across workers sharing an output directory.
    let sequence = Arc::new(AtomicU64::new(1));

    let first = create_listener(config.listen, reuse_port)?;
    let addr = first.local_addr()?;
    let datagram = config.datagram_listen.map(bind_datagram).transpose()?;
    let datagram_addr = datagram.as_ref().map(|d| d.local_addr()).transpose()?;

    info!(
        workers,
        addr = %addr,
        datagram = ?datagram_addr,
        buffer_size = config.buffer_size,
        "Starting runtime"
    );

    let mut loops = Vec::with_capacity(workers);
    loops.push(EventLoop::new(
        0,
        config,
        first,
        datagram,
        Arc::clone(&sequence),
        Arc::clone(&observer),
    )?);
    for worker_id in 1..workers {
        let listener = create_listener(addr, true)?;
        loops.push(EventLoop::new(
            worker_id,
            config,
            listener,
            None,
            Arc::clone(&sequence),
            Arc::clone(&observer),
        )?);
    }

    let shutdown = ShutdownHandle::combine(loops.iter().map(EventLoop::shutdown_handle));

    let mut handles = Vec::with_capacity(workers);
    for (worker_id, mut event_loop) in loops.into_iter().enumerate() {
        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = event_loop.run() {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;
        handles.push(handle);
    }

    Ok(Workers {
        addr,
        datagram_addr,
        shutdown,
        handles,
    })
}

/// Run the receiver until every worker exits.
pub fn run(config: Config) -> io::Result<()> {
    spawn(&config, Arc::new(TracingObserver))?.join();
    Ok(())
}
