//! Docshare Hub
//!
//! Lets one device share a document with other devices on the same local
//! network. Peers connect over WebSocket and receive the full document body
//! whenever it changes.
//!
//! ## Components
//!
//! - **Connection registry**: the set of live peers, with broadcast fan-out
//! - **Broadcast server**: accept loop plus one receive loop per peer
//! - **Sync manager**: starts/stops the server and publishes its state
//! - **Change publisher**: debounces local edits into commits
//! - **Sync client**: the peer side of the connection
//!
//! ## Environment Variables
//!
//! - `HOST`: Interface to bind (default: 0.0.0.0)
//! - `PORT`: Listening port (default: 8080)
//! - `DATABASE_PATH`: Path to the SQLite document store (default: ./docshare.db)
//! - `USER_ID`: Originator id for local edits (default: random UUID)
//! - `DEBOUNCE_MS`: Quiet period before an edit is committed (default: 1000)
//! - `SHUTDOWN_GRACE_MS`: Time peers get to close on stop (default: 1000)

pub mod client;
pub mod config;
pub mod inbound;
pub mod manager;
pub mod net;
pub mod publisher;
pub mod sync;

pub use client::SyncClient;
pub use config::Config;
pub use inbound::apply_remote_update;
pub use manager::{ServerState, SyncManager};
pub use publisher::{ChangePublisher, DocumentBroadcaster, Snapshot};
pub use sync::{BroadcastServer, ConnectionRegistry, ServerEvent, ServerPhase};
