use super::connection::handle_connection;
use super::events::{EventSender, ServerEvent};
use super::registry::ConnectionRegistry;
use docshare_core::{DocShareError, Result, SyncMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a [`BroadcastServer`].
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`. A failed start
/// goes from `Starting` straight back to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Settings shared by every server a manager creates
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Interface to bind
    pub host: String,
    /// Originator id for locally published updates
    pub user_id: String,
    /// How long `stop` waits for peers to close before aborting them
    pub shutdown_grace: Duration,
}

struct Listening {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// WebSocket server that fans document updates out to every connected peer.
pub struct BroadcastServer {
    options: ServerOptions,
    registry: Arc<ConnectionRegistry>,
    events: EventSender,
    phase: watch::Sender<ServerPhase>,
    /// Held for the whole of `start` and `stop`
    listening: Mutex<Option<Listening>>,
}

impl BroadcastServer {
    /// Create a stopped server reporting to `events`
    pub fn new(options: ServerOptions, events: EventSender) -> Self {
        let (phase, _) = watch::channel(ServerPhase::Stopped);
        Self {
            registry: Arc::new(ConnectionRegistry::with_events(events.clone())),
            options,
            events,
            phase,
            listening: Mutex::new(None),
        }
    }

    /// Bind `port` and start accepting peers.
    ///
    /// Returns the bound address. Calling this while running does nothing and
    /// returns the existing address. Port `0` binds an ephemeral port.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut listening = self.listening.lock().await;
        if let Some(current) = listening.as_ref() {
            debug!("Server already running on {}", current.local_addr);
            return Ok(current.local_addr);
        }

        self.phase.send_replace(ServerPhase::Starting);

        let addr = format!("{}:{}", self.options.host, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(source) => {
                error!("Failed to bind to {}: {}", addr, source);
                let err = DocShareError::Bind { addr, source };
                let _ = self.events.send(ServerEvent::error(err.to_string()));
                self.phase.send_replace(ServerPhase::Stopped);
                return Err(err);
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(a) => a,
            Err(e) => {
                self.phase.send_replace(ServerPhase::Stopped);
                return Err(e.into());
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.registry.clone(),
            self.events.clone(),
            shutdown_rx,
            self.options.shutdown_grace,
        ));

        *listening = Some(Listening {
            local_addr,
            shutdown_tx,
            accept_task,
        });
        self.phase.send_replace(ServerPhase::Running);

        info!("Broadcast server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop accepting, close every peer and release the socket.
    ///
    /// Does nothing when already stopped.
    pub async fn stop(&self) {
        let mut listening = self.listening.lock().await;
        let Some(running) = listening.take() else {
            return;
        };

        self.phase.send_replace(ServerPhase::Stopping);
        info!("Stopping broadcast server on {}", running.local_addr);

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.accept_task.await {
            if e.is_panic() {
                error!("Accept loop panicked: {}", e);
            }
        }

        // Anything the accept loop could not reach
        self.registry.close_all();
        self.phase.send_replace(ServerPhase::Stopped);
        info!("Broadcast server stopped");
    }

    /// Publish a locally originated edit to every connected peer.
    ///
    /// Returns the number of peers the frame was handed to.
    pub fn broadcast_document_update(
        &self,
        document_id: i64,
        title: &str,
        content: &str,
    ) -> Result<usize> {
        let message = SyncMessage::update(document_id, self.options.user_id.clone(), content);
        let delivered = self.registry.broadcast(&message, None)?;
        debug!(
            "Broadcast document {} ({:?}) to {} peers",
            document_id, title, delivered
        );
        Ok(delivered)
    }

    /// Address the listener is bound to, if running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().await.as_ref().map(|l| l.local_addr)
    }

    /// Observe lifecycle transitions
    pub fn phase(&self) -> watch::Receiver<ServerPhase> {
        self.phase.subscribe()
    }

    pub fn is_running(&self) -> bool {
        *self.phase.borrow() == ServerPhase::Running
    }

    /// Number of connected peers
    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn user_id(&self) -> &str {
        &self.options.user_id
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    events: EventSender,
    mut shutdown_rx: oneshot::Receiver<()>,
    shutdown_grace: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("Accepted TCP connection from {}", peer_addr);
                    connections.spawn(handle_connection(
                        stream,
                        peer_addr,
                        registry.clone(),
                        events.clone(),
                    ));
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    let _ = events.send(ServerEvent::error(format!("accept failed: {}", e)));
                    // Back off on fd exhaustion and similar
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },

            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    drop(listener);

    // Ask every peer to close, then give them the grace period
    let closing = registry.close_all();
    if closing > 0 {
        debug!("Waiting up to {:?} for {} peers to close", shutdown_grace, closing);
    }
    let drained = tokio::time::timeout(shutdown_grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Aborting {} connections that did not close in time", connections.len());
    }
    connections.shutdown().await;

    // Peers that finished their handshake during the grace period
    registry.close_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn options() -> ServerOptions {
        ServerOptions {
            host: "127.0.0.1".to_string(),
            user_id: "host".to_string(),
            shutdown_grace: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_phases() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = BroadcastServer::new(options(), tx);
        let phase = server.phase();
        assert_eq!(*phase.borrow(), ServerPhase::Stopped);

        let addr = server.start(0).await.unwrap();
        assert_eq!(*phase.borrow(), ServerPhase::Running);
        assert!(server.is_running());
        assert_eq!(server.local_addr().await, Some(addr));

        // Second start is a no-op returning the same address
        assert_eq!(server.start(0).await.unwrap(), addr);

        server.stop().await;
        assert_eq!(*phase.borrow(), ServerPhase::Stopped);
        assert_eq!(server.local_addr().await, None);

        // Stopping again is harmless
        server.stop().await;
        assert_eq!(*phase.borrow(), ServerPhase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_releases_the_port() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = BroadcastServer::new(options(), tx);
        let addr = server.start(0).await.unwrap();
        server.stop().await;

        let again = server.start(addr.port()).await.unwrap();
        assert_eq!(again.port(), addr.port());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_error_returns_to_stopped() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = BroadcastServer::new(options(), tx);
        let err = server.start(port).await.unwrap_err();

        assert!(matches!(err, DocShareError::Bind { .. }));
        assert_eq!(*server.phase().borrow(), ServerPhase::Stopped);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::ServerError { .. })));
    }

    #[tokio::test]
    async fn test_broadcast_without_peers_reaches_nobody() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = BroadcastServer::new(options(), tx);
        assert_eq!(server.broadcast_document_update(1, "Title", "Body").unwrap(), 0);
    }
}
