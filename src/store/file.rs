//! File-backed document store.
//!
//! # Directory Structure
//!
//! ```text
//! <root>/
//!   .store.lock                 # Exclusive lock held by every read and batch
//!   .journal.json               # Pending batch (present only mid-commit)
//!   tasks/
//!     <id>.json                 # {"revision": n, "data": {...}}
//!     <id>/history/<id>.json    # Nested collections live in sub-directories
//!   weeks/
//!     <id>.json
//! ```
//!
//! A batch is planned (preconditions checked) under the lock, written to
//! the journal atomically, applied document by document, and the journal is
//! removed. A journal left behind by a crash is rolled forward the next
//! time the lock is taken, so a batch is never observed half-applied.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::watch::SubscriberHub;
use super::{
    plan_batch, receipt_for, validate_collection, CommitReceipt, DocPath, Document,
    DocumentData, DocumentStore, PlannedWrite, Query, Subscription, WriteBatch,
};
use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

const LOCK_FILE: &str = ".store.lock";
const JOURNAL_FILE: &str = ".journal.json";
const DOC_EXTENSION: &str = ".json";
const WATCH_DEBOUNCE_MS: u64 = 150;

#[derive(Debug, Serialize, Deserialize)]
struct StoredDoc {
    revision: u64,
    data: DocumentData,
}

/// Document store persisted as one JSON file per document.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<FileInner>,
}

/// Keeps [`FileStore::follow_external_changes`] running while alive.
pub struct ExternalChanges {
    _watcher: RecommendedWatcher,
}

struct FileInner {
    root: PathBuf,
    lock_timeout_ms: u64,
    hub: SubscriberHub,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, lock_timeout_ms: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let inner = FileInner {
            root,
            lock_timeout_ms,
            hub: SubscriberHub::new(),
        };
        // Taking the lock once rolls forward any interrupted batch.
        drop(inner.lock()?);
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Open with the default lock timeout.
    pub fn open_default(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open(root, DEFAULT_LOCK_TIMEOUT_MS)
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Republish `collection` to subscribers whenever its directory changes
    /// on disk, including writes made by other processes.
    ///
    /// Must be called inside a tokio runtime. Forwarding stops when the
    /// returned handle is dropped.
    pub fn follow_external_changes(&self, collection: &str) -> Result<ExternalChanges> {
        validate_collection(collection)?;
        let dir = self.inner.collection_dir(collection);
        fs::create_dir_all(&dir)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let _ = tx.send(res);
            })
            .map_err(|err| Error::OperationFailed(format!("file watcher failed: {err}")))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| Error::OperationFailed(format!("file watcher failed: {err}")))?;

        let store = self.clone();
        let touched: BTreeSet<String> = BTreeSet::from([collection.to_string()]);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = event {
                    tracing::warn!(error = %err, "file watcher error");
                    continue;
                }
                tokio::time::sleep(Duration::from_millis(WATCH_DEBOUNCE_MS)).await;
                while rx.try_recv().is_ok() {}

                let touched = touched.clone();
                let republished = store
                    .blocking(move |inner| {
                        let _guard = inner.lock()?;
                        inner
                            .hub
                            .publish(&touched, |collection| inner.read_collection(collection));
                        Ok(())
                    })
                    .await;
                if let Err(err) = republished {
                    tracing::warn!(error = %err, "failed to republish external changes");
                }
            }
        });

        Ok(ExternalChanges { _watcher: watcher })
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileInner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || work(&inner))
            .await
            .map_err(|err| Error::OperationFailed(format!("store worker failed: {err}")))?
    }
}

impl FileInner {
    fn lock(&self) -> Result<FileLock> {
        let guard = FileLock::acquire(self.root.join(LOCK_FILE), self.lock_timeout_ms)?;
        self.recover_journal()?;
        Ok(guard)
    }

    fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        collection
            .split('/')
            .fold(self.root.clone(), |dir, segment| dir.join(segment))
    }

    fn doc_file(&self, path: &DocPath) -> PathBuf {
        self.collection_dir(path.collection())
            .join(format!("{}{DOC_EXTENSION}", path.id()))
    }

    fn recover_journal(&self) -> Result<()> {
        let journal = self.journal_path();
        if !journal.exists() {
            return Ok(());
        }
        let raw = fs::read(&journal)?;
        let planned: Vec<PlannedWrite> = serde_json::from_slice(&raw)?;
        tracing::warn!(
            writes = planned.len(),
            "rolling forward interrupted batch from journal"
        );
        self.apply(&planned)?;
        lock::remove_if_exists(&journal)?;
        Ok(())
    }

    fn apply(&self, planned: &[PlannedWrite]) -> Result<()> {
        for write in planned {
            match write {
                PlannedWrite::Put(doc) => {
                    let stored = StoredDoc {
                        revision: doc.revision,
                        data: doc.data.clone(),
                    };
                    let bytes = serde_json::to_vec_pretty(&stored)?;
                    lock::write_atomic(self.doc_file(&doc.path), &bytes)?;
                }
                PlannedWrite::Remove(path) => {
                    lock::remove_if_exists(self.doc_file(path))?;
                }
            }
        }
        Ok(())
    }

    fn read_doc(&self, path: &DocPath) -> Result<Option<Document>> {
        let file = self.doc_file(path);
        if !file.is_file() {
            return Ok(None);
        }
        let raw = fs::read(&file)?;
        let stored: StoredDoc =
            serde_json::from_slice(&raw).map_err(|err| Error::MalformedDocument {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Some(Document {
            path: path.clone(),
            revision: stored.revision,
            data: stored.data,
        }))
    }

    fn read_collection(&self, collection: &str) -> Result<Vec<Document>> {
        let dir = self.collection_dir(collection);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(DOC_EXTENSION)) else {
                continue;
            };
            match DocPath::new(collection, id) {
                Ok(path) => paths.push(path),
                Err(_) => tracing::debug!(file = %entry.path().display(), "ignoring stray file"),
            }
        }
        paths.sort();

        // One unreadable file must not hide the rest of the collection.
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            match self.read_doc(&path) {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => {}
                Err(Error::MalformedDocument { path, reason }) => {
                    tracing::warn!(document = %path, %reason, "skipping unreadable document");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(documents)
    }

    fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        if batch.is_empty() {
            return Ok(CommitReceipt::default());
        }
        let touched = batch.collections();

        let _guard = self.lock()?;
        let planned = plan_batch(batch.into_ops(), |path| self.read_doc(path))?;

        lock::write_atomic(self.journal_path(), &serde_json::to_vec(&planned)?)?;
        self.apply(&planned)?;
        lock::remove_if_exists(self.journal_path())?;

        let receipt = receipt_for(&planned);
        tracing::debug!(writes = planned.len(), root = %self.root.display(), "batch committed");

        self.hub
            .publish(&touched, |collection| self.read_collection(collection));
        Ok(receipt)
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        let path = path.clone();
        self.blocking(move |inner| {
            let _guard = inner.lock()?;
            inner.read_doc(&path)
        })
        .await
    }

    async fn get_all(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        validate_collection(collection)?;
        let collection = collection.to_string();
        let query = query.clone();
        self.blocking(move |inner| {
            let _guard = inner.lock()?;
            Ok(query.apply(inner.read_collection(&collection)?))
        })
        .await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        self.blocking(move |inner| inner.commit(batch)).await
    }

    async fn subscribe(&self, collection: &str, query: Query) -> Result<Subscription> {
        validate_collection(collection)?;
        let collection = collection.to_string();
        self.blocking(move |inner| {
            let _guard = inner.lock()?;
            let initial = inner.read_collection(&collection);
            Ok(inner.hub.register(&collection, query, initial))
        })
        .await
    }
}
