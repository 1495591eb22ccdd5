//! Document store implementations.
//!
//! - [`MemoryDocumentStore`] keeps everything in a `BTreeMap` (tests, fallback)
//! - [`SqliteDocumentStore`] persists to SQLite (native, `sqlite` feature)

mod memory;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
mod sqlite;

pub use memory::MemoryDocumentStore;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use sqlite::SqliteDocumentStore;
