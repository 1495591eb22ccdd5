//! Core types for docshare.
//!
//! A device running the docshare hub lets other devices on the local network
//! watch edits to a shared document in near real time. This crate holds the
//! pieces both sides agree on:
//!
//! - [`protocol`]: the JSON text frame exchanged over the WebSocket
//! - [`document`]: the document entity and the [`DocumentStore`] interface
//! - [`store`]: in-memory and SQLite document stores
//! - [`export`]: Word (`.docx`) export of rich text and documents
//! - [`error`]: the unified [`DocShareError`] type

pub mod document;
pub mod error;
pub mod export;
pub mod protocol;
pub mod store;

pub use document::{Document, DocumentStore, LiveQueries};
pub use error::{DocShareError, Result, SerializableError};
pub use export::{DocxBuilder, TextSpan, parse_delta};
pub use protocol::{SyncAction, SyncMessage};
pub use store::MemoryDocumentStore;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use store::SqliteDocumentStore;
