//! In-memory document store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::document::{Document, DocumentStore, LiveQueries};
use crate::error::{DocShareError, Result};

/// In-memory document store for testing.
///
/// Thread-safe via `Mutex`, but data is lost when dropped.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<i64, Document>>,
    /// Highest id ever stored; ids are never reused
    last_id: AtomicI64,
    live: LiveQueries,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            last_id: AtomicI64::new(0),
            live: LiveQueries::new(Vec::new()),
        }
    }

    fn docs(&self) -> MutexGuard<'_, BTreeMap<i64, Document>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish while the map lock is still held so snapshots stay ordered.
    fn publish(&self, docs: &BTreeMap<i64, Document>) {
        self.live.publish(docs.values().rev().cloned().collect());
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn insert(&self, document: &Document) -> Result<i64> {
        let mut docs = self.docs();
        let id = if document.id == 0 {
            self.last_id.load(Ordering::SeqCst) + 1
        } else {
            document.id
        };
        self.last_id.fetch_max(id, Ordering::SeqCst);
        docs.insert(
            id,
            Document {
                id,
                ..document.clone()
            },
        );
        self.publish(&docs);
        Ok(id)
    }

    fn update(&self, document: &Document) -> Result<()> {
        let mut docs = self.docs();
        match docs.get_mut(&document.id) {
            Some(existing) => *existing = document.clone(),
            None => return Err(DocShareError::DocumentNotFound(document.id)),
        }
        self.publish(&docs);
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        let mut docs = self.docs();
        if docs.remove(&id).is_some() {
            self.publish(&docs);
        }
        Ok(())
    }

    fn get_all(&self) -> watch::Receiver<Vec<Document>> {
        self.live.subscribe_all()
    }

    fn get_by_id(&self, id: i64) -> watch::Receiver<Option<Document>> {
        self.live.subscribe_one(id)
    }
}
