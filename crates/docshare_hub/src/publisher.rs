//! Debounced commit of local edits.
//!
//! Editors call [`ChangePublisher::submit`] on every change. Each call
//! restarts the quiet-period timer for that document; when the timer runs
//! out, the latest snapshot is committed: written to the document store and,
//! if the hub is running, broadcast to peers. Intermediate snapshots within a
//! burst are discarded.

use docshare_core::{DocShareError, Document, DocumentStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where committed edits are broadcast.
pub trait DocumentBroadcaster: Send + Sync {
    /// Whether broadcasting is currently possible
    fn is_running(&self) -> bool;

    /// Send the document to connected peers, returning how many got it
    fn broadcast_document_update(&self, document_id: i64, title: &str, content: &str) -> usize;
}

/// The state of one document at one moment of editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub document_id: i64,
    pub title: String,
    pub content: String,
}

impl Snapshot {
    pub fn new(document_id: i64, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_id,
            title: title.into(),
            content: content.into(),
        }
    }
}

struct PendingCommit {
    generation: u64,
    task: JoinHandle<()>,
}

struct PublisherInner {
    store: Arc<dyn DocumentStore>,
    broadcaster: Arc<dyn DocumentBroadcaster>,
    quiet_period: Duration,
    /// One pending timer per document id
    pending: Mutex<HashMap<i64, PendingCommit>>,
    /// Newest generation committed per document id. Held for the whole commit.
    committed: Mutex<HashMap<i64, Arc<Mutex<u64>>>>,
    next_generation: AtomicU64,
}

impl PublisherInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<i64, PendingCommit>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the timer entry if it still belongs to `generation`.
    fn claim(&self, document_id: i64, generation: u64) -> bool {
        let mut pending = self.pending();
        match pending.get(&document_id) {
            Some(p) if p.generation == generation => {
                pending.remove(&document_id);
                true
            }
            _ => false,
        }
    }

    fn commit_lock(&self, document_id: i64) -> Arc<Mutex<u64>> {
        let mut committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(committed.entry(document_id).or_default())
    }

    /// Commit unless a newer snapshot of the same document already went out.
    fn commit_generation(&self, snapshot: &Snapshot, generation: u64) -> bool {
        let lock = self.commit_lock(snapshot.document_id);
        let mut newest = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if generation < *newest {
            debug!(
                "Skipping superseded commit of document {}",
                snapshot.document_id
            );
            return false;
        }
        *newest = generation;
        self.commit(snapshot);
        true
    }

    /// Persist, then broadcast. A failed write does not stop the broadcast.
    fn commit(&self, snapshot: &Snapshot) {
        let document = Document::new(
            snapshot.document_id,
            snapshot.title.clone(),
            snapshot.content.clone(),
        );

        let written = match self.store.update(&document) {
            Err(DocShareError::DocumentNotFound(_)) => self.store.insert(&document).map(|_| ()),
            other => other,
        };
        if let Err(e) = written {
            warn!(
                "Failed to persist document {}: {}",
                snapshot.document_id, e
            );
        }

        if self.broadcaster.is_running() {
            let peers = self.broadcaster.broadcast_document_update(
                snapshot.document_id,
                &snapshot.title,
                &snapshot.content,
            );
            debug!(
                "Committed document {} and sent it to {} peers",
                snapshot.document_id, peers
            );
        } else {
            debug!("Committed document {} locally", snapshot.document_id);
        }
    }
}

/// Coalesces bursts of edits into single commits.
pub struct ChangePublisher {
    inner: Arc<PublisherInner>,
}

impl ChangePublisher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        broadcaster: Arc<dyn DocumentBroadcaster>,
        quiet_period: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                store,
                broadcaster,
                quiet_period,
                pending: Mutex::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.inner.quiet_period
    }

    /// Record a new edit, restarting the quiet-period timer for its document.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, snapshot: Snapshot) {
        let document_id = snapshot.document_id;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);

        // Spawned under the lock so the timer always finds its own entry
        let mut pending = self.inner.pending();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            if inner.claim(document_id, generation) {
                inner.commit_generation(&snapshot, generation);
            }
        });

        if let Some(previous) = pending.insert(document_id, PendingCommit { generation, task }) {
            previous.task.abort();
        }
    }

    /// Commit immediately, dropping any pending timer for the document.
    ///
    /// A timer commit already in flight either finishes first or is skipped,
    /// so the saved snapshot is never overwritten by an older one.
    pub fn save_now(&self, snapshot: Snapshot) {
        self.cancel(snapshot.document_id);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.commit_generation(&snapshot, generation);
    }

    /// Drop the pending commit for a document. Returns false if none was pending.
    pub fn cancel(&self, document_id: i64) -> bool {
        match self.inner.pending().remove(&document_id) {
            Some(previous) => {
                previous.task.abort();
                true
            }
            None => false,
        }
    }

    /// Number of documents with a commit waiting on its timer
    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Cancel every pending commit. Nothing is written after this returns.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.inner.pending().drain().collect();
        if !drained.is_empty() {
            debug!("Discarding {} pending commits", drained.len());
        }
        for (_, previous) in drained {
            previous.task.abort();
        }
    }
}

impl Drop for ChangePublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshare_core::MemoryDocumentStore;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct RecordingBroadcaster {
        running: AtomicBool,
        sent: Mutex<Vec<(i64, String, String)>>,
    }

    impl RecordingBroadcaster {
        fn running() -> Arc<Self> {
            let b = Self::default();
            b.running.store(true, Ordering::SeqCst);
            Arc::new(b)
        }

        fn sent(&self) -> Vec<(i64, String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl DocumentBroadcaster for RecordingBroadcaster {
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn broadcast_document_update(&self, document_id: i64, title: &str, content: &str) -> usize {
            self.sent
                .lock()
                .unwrap()
                .push((document_id, title.to_string(), content.to_string()));
            1
        }
    }

    /// Store that counts writes and can be told to fail them.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryDocumentStore,
        writes: Mutex<Vec<Document>>,
        fail: AtomicBool,
    }

    impl DocumentStore for CountingStore {
        fn insert(&self, document: &Document) -> docshare_core::Result<i64> {
            self.writes.lock().unwrap().push(document.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(DocShareError::Persistence("disk full".into()));
            }
            self.inner.insert(document)
        }

        fn update(&self, document: &Document) -> docshare_core::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                self.writes.lock().unwrap().push(document.clone());
                return Err(DocShareError::Persistence("disk full".into()));
            }
            let result = self.inner.update(document);
            if result.is_ok() {
                self.writes.lock().unwrap().push(document.clone());
            }
            result
        }

        fn delete(&self, id: i64) -> docshare_core::Result<()> {
            self.inner.delete(id)
        }

        fn get_all(&self) -> tokio::sync::watch::Receiver<Vec<Document>> {
            self.inner.get_all()
        }

        fn get_by_id(&self, id: i64) -> tokio::sync::watch::Receiver<Option<Document>> {
            self.inner.get_by_id(id)
        }
    }

    const QUIET: Duration = Duration::from_millis(1000);

    fn setup() -> (Arc<CountingStore>, Arc<RecordingBroadcaster>, ChangePublisher) {
        let store = Arc::new(CountingStore::default());
        store.inner.insert(&Document::new(1, "Title", "")).unwrap();
        let broadcaster = RecordingBroadcaster::running();
        let publisher = ChangePublisher::new(store.clone(), broadcaster.clone(), QUIET);
        (store, broadcaster, publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_commits_once_with_latest_snapshot() {
        let (store, broadcaster, publisher) = setup();

        for text in ["H", "He", "Hel", "Hell", "Hello"] {
            publisher.submit(Snapshot::new(1, "Title", text));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(broadcaster.sent().is_empty());

        tokio::time::sleep(QUIET).await;

        assert_eq!(store.writes.lock().unwrap().len(), 1);
        assert_eq!(
            broadcaster.sent(),
            vec![(1, "Title".to_string(), "Hello".to_string())]
        );
        let doc = store.get_by_id(1).borrow().clone().unwrap();
        assert_eq!(doc.content, "Hello");
        assert_eq!(publisher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separated_snapshots_commit_twice() {
        let (store, broadcaster, publisher) = setup();

        publisher.submit(Snapshot::new(1, "Title", "first"));
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;
        publisher.submit(Snapshot::new(1, "Title", "second"));
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;

        let contents: Vec<String> = broadcaster.sent().into_iter().map(|(_, _, c)| c).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(store.writes.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_documents_debounce_independently() {
        let (store, broadcaster, publisher) = setup();
        store.inner.insert(&Document::new(2, "Other", "")).unwrap();

        publisher.submit(Snapshot::new(1, "Title", "one"));
        publisher.submit(Snapshot::new(2, "Other", "two"));
        assert_eq!(publisher.pending_count(), 2);

        tokio::time::sleep(QUIET * 2).await;

        let mut ids: Vec<i64> = broadcaster.sent().into_iter().map(|(id, _, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_now_bypasses_and_cancels_timer() {
        let (store, broadcaster, publisher) = setup();

        publisher.submit(Snapshot::new(1, "Title", "draft"));
        publisher.save_now(Snapshot::new(1, "Title", "final"));
        assert_eq!(broadcaster.sent().len(), 1);
        assert_eq!(publisher.pending_count(), 0);

        tokio::time::sleep(QUIET * 3).await;

        assert_eq!(
            broadcaster.sent(),
            vec![(1, "Title".to_string(), "final".to_string())]
        );
        assert_eq!(store.writes.lock().unwrap().len(), 1);
    }

    /// Store whose `update` blocks on a gate when it sees `gate` content.
    struct GatedStore {
        inner: MemoryDocumentStore,
        gate: &'static str,
        entered: Mutex<std::sync::mpsc::Sender<()>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl DocumentStore for GatedStore {
        fn insert(&self, document: &Document) -> docshare_core::Result<i64> {
            self.inner.insert(document)
        }

        fn update(&self, document: &Document) -> docshare_core::Result<()> {
            if document.content == self.gate {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.update(document)
        }

        fn delete(&self, id: i64) -> docshare_core::Result<()> {
            self.inner.delete(id)
        }

        fn get_all(&self) -> tokio::sync::watch::Receiver<Vec<Document>> {
            self.inner.get_all()
        }

        fn get_by_id(&self, id: i64) -> tokio::sync::watch::Receiver<Option<Document>> {
            self.inner.get_by_id(id)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_save_now_is_not_overwritten_by_in_flight_commit() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryDocumentStore::new(),
            gate: "draft",
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        store.insert(&Document::new(1, "Title", "")).unwrap();
        let broadcaster = RecordingBroadcaster::running();
        let publisher = Arc::new(ChangePublisher::new(
            store.clone(),
            broadcaster.clone(),
            Duration::from_millis(10),
        ));

        publisher.submit(Snapshot::new(1, "Title", "draft"));
        // Timer commit is now blocked inside the store write
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let saver = {
            let publisher = Arc::clone(&publisher);
            tokio::task::spawn_blocking(move || {
                publisher.save_now(Snapshot::new(1, "Title", "final"))
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        release_tx.send(()).unwrap();
        saver.await.unwrap();

        assert_eq!(
            store.get_by_id(1).borrow().as_ref().unwrap().content,
            "final"
        );
        let contents: Vec<String> = broadcaster.sent().into_iter().map(|(_, _, c)| c).collect();
        assert_eq!(contents.last().map(String::as_str), Some("final"));
    }

    #[test]
    fn test_superseded_generation_is_skipped() {
        let (store, broadcaster, publisher) = setup();

        assert!(publisher.inner.commit_generation(&Snapshot::new(1, "Title", "new"), 5));
        assert!(!publisher.inner.commit_generation(&Snapshot::new(1, "Title", "old"), 4));

        assert_eq!(broadcaster.sent().len(), 1);
        assert_eq!(store.get_by_id(1).borrow().as_ref().unwrap().content, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_running_only_persists() {
        let store = Arc::new(CountingStore::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let publisher = ChangePublisher::new(store.clone(), broadcaster.clone(), QUIET);

        publisher.submit(Snapshot::new(7, "New", "body"));
        tokio::time::sleep(QUIET * 2).await;

        assert!(broadcaster.sent().is_empty());
        // Unknown ids are inserted
        let doc = store.get_by_id(7).borrow().clone().unwrap();
        assert_eq!(doc, Document::new(7, "New", "body"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_still_broadcasts() {
        let (store, broadcaster, publisher) = setup();
        store.fail.store(true, Ordering::SeqCst);

        publisher.submit(Snapshot::new(1, "Title", "unsaved"));
        tokio::time::sleep(QUIET * 2).await;

        assert_eq!(broadcaster.sent().len(), 1);
        assert_eq!(store.get_by_id(1).borrow().as_ref().unwrap().content, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_commits() {
        let (store, broadcaster, publisher) = setup();

        publisher.submit(Snapshot::new(1, "Title", "late"));
        publisher.shutdown();
        tokio::time::sleep(QUIET * 2).await;

        assert!(broadcaster.sent().is_empty());
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_commits() {
        let (store, broadcaster, publisher) = setup();

        publisher.submit(Snapshot::new(1, "Title", "late"));
        drop(publisher);
        tokio::time::sleep(QUIET * 2).await;

        assert!(broadcaster.sent().is_empty());
        assert!(store.writes.lock().unwrap().is_empty());
    }
}
