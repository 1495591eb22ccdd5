//! Document entity and the persistence interface the sync layer writes through.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;

/// A shared document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier. `0` asks the store to assign one on insert.
    pub id: i64,
    pub title: String,
    /// Document body (markup or plain text)
    pub content: String,
}

impl Document {
    pub fn new(id: i64, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Trait for document persistence backends.
///
/// Writes are synchronous and cheap enough to call from async code. Reads are
/// live: the returned receivers observe every later successful write.
pub trait DocumentStore: Send + Sync {
    /// Insert a document, replacing any document with the same id.
    ///
    /// An id of `0` assigns the next free id. Returns the stored id.
    fn insert(&self, document: &Document) -> Result<i64>;

    /// Overwrite an existing document.
    ///
    /// Fails with `DocumentNotFound` if no document has this id.
    fn update(&self, document: &Document) -> Result<()>;

    /// Delete a document. Deleting a missing id is a no-op.
    fn delete(&self, id: i64) -> Result<()>;

    /// All documents, most recent (highest id) first.
    fn get_all(&self) -> watch::Receiver<Vec<Document>>;

    /// A single document, `None` while it does not exist.
    fn get_by_id(&self, id: i64) -> watch::Receiver<Option<Document>>;
}

/// Fan-out of query results to live subscribers.
///
/// Stores call [`LiveQueries::publish`] with the full ordered snapshot after
/// each successful write.
#[derive(Debug)]
pub struct LiveQueries {
    all: watch::Sender<Vec<Document>>,
    by_id: Mutex<HashMap<i64, watch::Sender<Option<Document>>>>,
}

impl LiveQueries {
    pub fn new(initial: Vec<Document>) -> Self {
        let (all, _) = watch::channel(initial);
        Self {
            all,
            by_id: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a new snapshot to every subscriber.
    pub fn publish(&self, documents: Vec<Document>) {
        // Held until `all` is replaced; subscribe_one seeds from `all` under it.
        let mut by_id = self.by_id.lock().unwrap_or_else(PoisonError::into_inner);
        by_id.retain(|_, tx| tx.receiver_count() > 0);
        for (id, tx) in by_id.iter() {
            let current = documents.iter().find(|d| d.id == *id).cloned();
            tx.send_if_modified(|slot| {
                if *slot != current {
                    *slot = current;
                    true
                } else {
                    false
                }
            });
        }
        self.all.send_replace(documents);
    }

    pub fn subscribe_all(&self) -> watch::Receiver<Vec<Document>> {
        self.all.subscribe()
    }

    pub fn subscribe_one(&self, id: i64) -> watch::Receiver<Option<Document>> {
        let mut by_id = self.by_id.lock().unwrap_or_else(PoisonError::into_inner);
        by_id
            .entry(id)
            .or_insert_with(|| {
                let current = self.all.borrow().iter().find(|d| d.id == id).cloned();
                watch::channel(current).0
            })
            .subscribe()
    }
}
