use super::events::{EventSender, ServerEvent};
use chrono::{DateTime, Utc};
use docshare_core::{Result, SyncMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Identifier assigned to a connection when it registers
pub type ConnectionId = u64;

/// Frames a peer may have queued before it is considered stalled
pub const OUTBOUND_CAPACITY: usize = 64;

/// Outbound half of a peer connection.
///
/// Frames pushed here are written to the socket by the connection's task.
/// Dropping the transport (or pushing a close frame) ends that task. The
/// queue is bounded; a peer that falls [`OUTBOUND_CAPACITY`] frames behind is
/// dropped.
#[derive(Debug)]
pub struct PeerTransport {
    outbound: mpsc::Sender<Message>,
    peer_addr: Option<SocketAddr>,
}

impl PeerTransport {
    pub fn new(outbound: mpsc::Sender<Message>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            outbound,
            peer_addr,
        }
    }

    /// Create a transport plus the receiver its writer drains.
    pub fn channel(peer_addr: Option<SocketAddr>) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self::new(tx, peer_addr), rx)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn send(&self, message: Message) -> std::result::Result<(), TrySendError<Message>> {
        self.outbound.try_send(message)
    }

    fn close(self) {
        // The writer may be gone or backed up; dropping the sender ends it either way
        let _ = self.outbound.try_send(Message::Close(None));
    }
}

/// A registered peer
#[derive(Debug)]
struct Connection {
    transport: PeerTransport,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, Connection>,
}

/// Set of live peer connections.
///
/// One lock covers the id counter, the connection map and every write
/// performed by [`ConnectionRegistry::broadcast`], so a broadcast never sees
/// a half-registered or half-removed connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    events: Option<EventSender>,
}

impl ConnectionRegistry {
    /// Create a registry that does not report count changes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that emits `ConnectionCountChanged` on every change
    pub fn with_events(events: EventSender) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            events: Some(events),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emitted while the lock is held so counts arrive in mutation order.
    fn notify_count(&self, inner: &RegistryInner) {
        if let Some(events) = &self.events {
            let _ = events.send(ServerEvent::ConnectionCountChanged {
                count: inner.connections.len(),
            });
        }
    }

    /// Register a connection and return its fresh identifier
    pub fn register(&self, transport: PeerTransport) -> ConnectionId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        debug!(
            "Registered connection {} from {:?}",
            id,
            transport.peer_addr()
        );
        inner.connections.insert(
            id,
            Connection {
                transport,
                created_at: Utc::now(),
            },
        );
        self.notify_count(&inner);
        id
    }

    /// Remove and close a connection. Returns false if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.lock();
        let Some(connection) = inner.connections.remove(&id) else {
            return false;
        };
        debug!(
            "Unregistered connection {} after {}s",
            id,
            (Utc::now() - connection.created_at).num_seconds()
        );
        connection.transport.close();
        self.notify_count(&inner);
        true
    }

    /// Send a message to every registered connection except `exclude`.
    ///
    /// The message is serialized once. A connection whose writer has gone
    /// away, or whose queue is full, is unregistered; delivery to the others
    /// continues. Returns the number of connections the frame was handed to.
    pub fn broadcast(&self, message: &SyncMessage, exclude: Option<ConnectionId>) -> Result<usize> {
        let frame = Message::text(message.encode()?);

        let mut inner = self.lock();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, connection) in &inner.connections {
            if Some(*id) == exclude {
                continue;
            }
            match connection.transport.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Dropping connection {}: outbound queue full", id);
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Dropping connection {}: writer closed", id);
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            for id in &dead {
                if let Some(connection) = inner.connections.remove(id) {
                    connection.transport.close();
                }
            }
            self.notify_count(&inner);
        }

        Ok(delivered)
    }

    /// Number of live connections
    pub fn count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Whether a connection is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&id)
    }

    /// Close and remove every connection. Returns how many were removed.
    pub fn close_all(&self) -> usize {
        let mut inner = self.lock();
        let closed = inner.connections.len();
        if closed == 0 {
            return 0;
        }
        for (_, connection) in inner.connections.drain() {
            connection.transport.close();
        }
        self.notify_count(&inner);
        closed
    }
}
