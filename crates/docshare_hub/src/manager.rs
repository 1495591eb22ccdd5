//! Owner of the broadcast server and its observable state.
//!
//! The application constructs one [`SyncManager`] at its composition root
//! and hands `Arc<SyncManager>` to whatever needs to start, stop or observe
//! sharing. UI code reads [`ServerState`] through a watch channel and
//! [`ServerEvent`]s through a broadcast channel; it never touches the network.

use crate::config::Config;
use crate::net::{self, NOT_CONNECTED};
use crate::publisher::DocumentBroadcaster;
use crate::sync::{BroadcastServer, EventReceiver, ServerEvent, ServerOptions};
use docshare_core::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, error, info, warn};

/// Capacity of the UI event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the UI shows about the hub.
///
/// Replaced as a whole on every transition, so readers never see a partly
/// started or partly stopped server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerState {
    pub running: bool,
    /// Local network address peers should dial, or a placeholder
    pub bind_address: String,
    pub port: u16,
    pub connected_count: usize,
}

impl ServerState {
    fn stopped(port: u16) -> Self {
        Self {
            running: false,
            bind_address: NOT_CONNECTED.to_string(),
            port,
            connected_count: 0,
        }
    }

    /// `address:port` while running, otherwise the placeholder.
    pub fn display_address(&self) -> String {
        if self.running {
            format!("{}:{}", self.bind_address, self.port)
        } else {
            NOT_CONNECTED.to_string()
        }
    }
}

/// Starts, stops and republishes the status of the broadcast server.
pub struct SyncManager {
    options: ServerOptions,
    default_port: u16,
    /// Serializes start and stop
    lifecycle: Mutex<()>,
    server: RwLock<Option<Arc<BroadcastServer>>>,
    state: Arc<watch::Sender<ServerState>>,
    events: broadcast::Sender<ServerEvent>,
    /// Bumped on every start and stop; stale relays check it
    generation: Arc<AtomicU64>,
}

impl SyncManager {
    pub fn new(config: &Config) -> Self {
        let (state, _) = watch::channel(ServerState::stopped(config.port));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            options: ServerOptions {
                host: config.host.clone(),
                user_id: config.user_id.clone(),
                shutdown_grace: config.shutdown_grace,
            },
            default_port: config.port,
            lifecycle: Mutex::new(()),
            server: RwLock::new(None),
            state: Arc::new(state),
            events,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start sharing on `port`, or the configured port when `None`.
    ///
    /// Succeeds without doing anything if already running. On failure the
    /// state stays stopped and a `ServerError` event is published.
    pub async fn start_server(&self, port: Option<u16>) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        if self.state.borrow().running {
            warn!("Server already running");
            return Ok(());
        }

        let port = port.unwrap_or(self.default_port);
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let server = Arc::new(BroadcastServer::new(self.options.clone(), events_tx));

        let local_addr = match server.start(port).await {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to start server: {}", e);
                let _ = self.events.send(ServerEvent::error(format!(
                    "could not start server: {}",
                    e
                )));
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let bind_address = net::resolve_bind_address(&self.options.host);

        *self.server.write().unwrap_or_else(PoisonError::into_inner) = Some(server.clone());
        self.state.send_replace(ServerState {
            running: true,
            bind_address,
            port: local_addr.port(),
            connected_count: server.connection_count(),
        });

        tokio::spawn(relay_events(
            events_rx,
            self.state.clone(),
            self.events.clone(),
            self.generation.clone(),
            generation,
        ));

        info!(
            "Sync server started on {}",
            self.state.borrow().display_address()
        );
        Ok(())
    }

    /// Stop sharing. Safe to call when not running.
    pub async fn stop_server(&self) {
        let _guard = self.lifecycle.lock().await;

        let server = self
            .server
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(server) = server else {
            debug!("Stop requested while not running");
            return;
        };

        // Count changes during the grace period still reach the state
        server.stop().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|s| {
            s.running = false;
            s.connected_count = 0;
            s.bind_address = NOT_CONNECTED.to_string();
        });
        info!("Sync server stopped");
    }

    /// Send a locally edited document to every peer. No-op while stopped.
    pub fn broadcast_document_update(&self, document_id: i64, title: &str, content: &str) -> usize {
        let server = self
            .server
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(server) = server else {
            debug!("Not running, skipping broadcast of document {}", document_id);
            return 0;
        };

        match server.broadcast_document_update(document_id, title, content) {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!("Failed to broadcast document {}: {}", document_id, e);
                0
            }
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> ServerState {
        self.state.borrow().clone()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Observe server events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Originator id stamped on local broadcasts
    pub fn user_id(&self) -> &str {
        &self.options.user_id
    }
}

impl DocumentBroadcaster for SyncManager {
    fn is_running(&self) -> bool {
        SyncManager::is_running(self)
    }

    fn broadcast_document_update(&self, document_id: i64, title: &str, content: &str) -> usize {
        SyncManager::broadcast_document_update(self, document_id, title, content)
    }
}

/// Apply one server's events to the shared state and republish them.
///
/// Ends when the server and all its connections are gone.
async fn relay_events(
    mut events_rx: EventReceiver,
    state: Arc<watch::Sender<ServerState>>,
    events: broadcast::Sender<ServerEvent>,
    current_generation: Arc<AtomicU64>,
    generation: u64,
) {
    while let Some(event) = events_rx.recv().await {
        match &event {
            ServerEvent::ConnectionCountChanged { count } => {
                let count = *count;
                state.send_if_modified(|s| {
                    let live = current_generation.load(Ordering::SeqCst) == generation;
                    if live && s.running && s.connected_count != count {
                        s.connected_count = count;
                        true
                    } else {
                        false
                    }
                });
                debug!("Client count changed: {}", count);
            }
            ServerEvent::MessageReceived { message } => {
                debug!(
                    "Message received: document={}, from={}",
                    message.document_id, message.user_id
                );
            }
            ServerEvent::ServerError { message } => {
                warn!("Server error: {}", message);
            }
        }
        // No subscribers is fine
        let _ = events.send(event);
    }
}
