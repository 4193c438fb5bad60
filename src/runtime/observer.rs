//! Pluggable observability for the dispatch loop.
//!
//! The loop reports what happens to each transport as a [`LoopEvent`] keyed
//! by [`TransportId`]. What to do with it is up to the injected
//! [`Observer`]: the default [`TracingObserver`] turns events into structured
//! `tracing` records, [`RecordingObserver`] keeps them in memory.

use crate::runtime::transport::TransportKind;
use crate::runtime::TransportId;
use bytes::Bytes;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};

/// Something that happened to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// A listening or datagram transport is registered and waiting.
    Listening { kind: TransportKind, addr: SocketAddr },
    /// A connection was accepted and its sink created.
    Accepted { peer: SocketAddr, path: PathBuf },
    /// A connection was accepted and immediately dropped.
    Rejected { peer: SocketAddr, reason: String },
    /// Bytes moved from the transport into its sink.
    Received { bytes: usize },
    /// The peer finished sending; the sink is flushed and closed.
    Completed {
        peer: SocketAddr,
        path: PathBuf,
        bytes: u64,
    },
    /// Acknowledgement fully written back to the peer.
    Acknowledged { bytes: usize },
    /// One datagram received.
    Datagram { peer: SocketAddr, payload: Bytes },
    /// A per-transport error; the transport is closed right after.
    Failed { error: String },
    /// Transport deregistered and released.
    Closed,
    /// The loop is exiting.
    Shutdown,
}

impl LoopEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LoopEvent::Listening { .. } => "listening",
            LoopEvent::Accepted { .. } => "accepted",
            LoopEvent::Rejected { .. } => "rejected",
            LoopEvent::Received { .. } => "received",
            LoopEvent::Completed { .. } => "completed",
            LoopEvent::Acknowledged { .. } => "acknowledged",
            LoopEvent::Datagram { .. } => "datagram",
            LoopEvent::Failed { .. } => "failed",
            LoopEvent::Closed => "closed",
            LoopEvent::Shutdown => "shutdown",
        }
    }
}

/// Receives loop events. Called on the dispatch thread; keep it cheap.
pub trait Observer: Send + Sync {
    fn observe(&self, worker: usize, id: TransportId, event: &LoopEvent);
}

impl<O: Observer + ?Sized> Observer for Arc<O> {
    fn observe(&self, worker: usize, id: TransportId, event: &LoopEvent) {
        (**self).observe(worker, id, event)
    }
}

/// Emits every event as a `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, worker: usize, id: TransportId, event: &LoopEvent) {
        let kind = event.kind();
        match event {
            LoopEvent::Listening { kind: endpoint, addr } => {
                info!(worker, transport = %id, event = kind, endpoint = endpoint.name(), addr = %addr, "Listening");
            }
            LoopEvent::Accepted { peer, path } => {
                debug!(worker, transport = %id, event = kind, peer = %peer, path = %path.display(), "Accepted connection");
            }
            LoopEvent::Rejected { peer, reason } => {
                warn!(worker, transport = %id, event = kind, peer = %peer, reason = %reason, "Rejected connection");
            }
            LoopEvent::Received { bytes } => {
                trace!(worker, transport = %id, event = kind, bytes, "Received");
            }
            LoopEvent::Completed { peer, path, bytes } => {
                info!(worker, transport = %id, event = kind, peer = %peer, path = %path.display(), bytes, "Transfer complete");
            }
            LoopEvent::Acknowledged { bytes } => {
                debug!(worker, transport = %id, event = kind, bytes, "Acknowledged");
            }
            LoopEvent::Datagram { peer, payload } => {
                info!(
                    worker,
                    transport = %id,
                    event = kind,
                    peer = %peer,
                    bytes = payload.len(),
                    text = %String::from_utf8_lossy(payload),
                    "Datagram"
                );
            }
            LoopEvent::Failed { error } => {
                debug!(worker, transport = %id, event = kind, error = %error, "Transport error");
            }
            LoopEvent::Closed => {
                debug!(worker, transport = %id, event = kind, "Closed");
            }
            LoopEvent::Shutdown => {
                info!(worker, event = kind, "Worker stopped");
            }
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(TransportId, LoopEvent)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything observed so far.
    pub fn events(&self) -> Vec<(TransportId, LoopEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the events for one transport.
    pub fn events_for(&self, id: TransportId) -> Vec<LoopEvent> {
        self.events()
            .into_iter()
            .filter(|(event_id, _)| *event_id == id)
            .map(|(_, event)| event)
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, _worker: usize, id: TransportId, event: &LoopEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((id, event.clone()));
        }
    }
}
