//! In-memory document store.
//!
//! Holds every document in one ordered map behind an async mutex, so each
//! batch is applied atomically with respect to readers. Also serves as the
//! test double for the schedule engine: reads and commits can be made to
//! fail on demand, and commits are counted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::watch::SubscriberHub;
use super::{
    plan_batch, receipt_for, validate_collection, CommitReceipt, DocPath, Document,
    DocumentStore, PlannedWrite, Query, Subscription, WriteBatch,
};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<DocPath, Document>>,
    hub: SubscriberHub,
    failing_reads: AtomicU32,
    failing_commits: AtomicU32,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` reads fail with `Error::StoreUnavailable`.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail with `Error::StoreUnavailable`.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of batches committed successfully so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of documents currently stored, across all collections.
    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }

    fn injected_failure(counter: &AtomicU32, what: &str) -> Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            Err(Error::StoreUnavailable(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

fn collection_docs(docs: &BTreeMap<DocPath, Document>, collection: &str) -> Vec<Document> {
    docs.values()
        .filter(|doc| doc.path.collection() == collection)
        .cloned()
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        Self::injected_failure(&self.failing_reads, "read")?;
        Ok(self.docs.lock().await.get(path).cloned())
    }

    async fn get_all(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        validate_collection(collection)?;
        Self::injected_failure(&self.failing_reads, "read")?;
        let docs = self.docs.lock().await;
        Ok(query.apply(collection_docs(&docs, collection)))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        Self::injected_failure(&self.failing_commits, "commit")?;
        if batch.is_empty() {
            return Ok(CommitReceipt::default());
        }

        let touched: BTreeSet<String> = batch.collections();
        let mut docs = self.docs.lock().await;
        let planned = plan_batch(batch.into_ops(), |path| Ok(docs.get(path).cloned()))?;
        let receipt = receipt_for(&planned);

        for write in planned {
            match write {
                PlannedWrite::Put(doc) => {
                    docs.insert(doc.path.clone(), doc);
                }
                PlannedWrite::Remove(path) => {
                    docs.remove(&path);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);

        self.hub
            .publish(&touched, |collection| Ok(collection_docs(&docs, collection)));
        Ok(receipt)
    }

    async fn subscribe(&self, collection: &str, query: Query) -> Result<Subscription> {
        validate_collection(collection)?;
        let docs = self.docs.lock().await;
        let initial = Ok(collection_docs(&docs, collection));
        Ok(self.hub.register(collection, query, initial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentData;
    use serde_json::{json, Value};

    fn data(value: Value) -> DocumentData {
        value.as_object().cloned().unwrap()
    }

    fn path(collection: &str, id: &str) -> DocPath {
        DocPath::new(collection, id).unwrap()
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store = MemoryStore::new();
        let task = path("tasks", "t1");

        assert_eq!(store.set(&task, data(json!({"a": 1}))).await.unwrap(), 1);
        assert_eq!(store.set(&task, data(json!({"a": 2}))).await.unwrap(), 2);

        let doc = store.get(&task).await.unwrap().expect("doc");
        assert_eq!(doc.revision, 2);
        assert_eq!(doc.data["a"], json!(2));

        store.delete(&task).await.unwrap();
        assert!(store.get(&task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_merge_keeps_other_fields() {
        let store = MemoryStore::new();
        let task = path("tasks", "t1");
        store
            .set(&task, data(json!({"status": "PROGRAMADA", "description": "x"})))
            .await
            .unwrap();
        store
            .set_merge(&task, data(json!({"status": "CONCLUÍDA"})))
            .await
            .unwrap();

        let doc = store.get(&task).await.unwrap().unwrap();
        assert_eq!(doc.data["status"], json!("CONCLUÍDA"));
        assert_eq!(doc.data["description"], json!("x"));
    }

    #[tokio::test]
    async fn get_all_is_scoped_to_collection() {
        let store = MemoryStore::new();
        store.set(&path("weeks", "w1"), DocumentData::new()).await.unwrap();
        store.set(&path("weeks", "w2"), DocumentData::new()).await.unwrap();
        store.set(&path("tasks", "t1"), DocumentData::new()).await.unwrap();
        store
            .set(&path("tasks/t1/history", "h1"), DocumentData::new())
            .await
            .unwrap();

        assert_eq!(store.get_all("weeks", &Query::all()).await.unwrap().len(), 2);
        assert_eq!(store.get_all("tasks", &Query::all()).await.unwrap().len(), 1);
        assert_eq!(
            store
                .get_all("tasks/t1/history", &Query::all())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn conflicting_batch_applies_nothing() {
        let store = MemoryStore::new();
        let w1 = path("weeks", "w1");
        let w2 = path("weeks", "w2");
        store.set(&w1, data(json!({"v": 1}))).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.set_checked(w2.clone(), data(json!({"v": 1})), 0);
        batch.set_checked(w1.clone(), data(json!({"v": 2})), 7);

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(store.get(&w2).await.unwrap().is_none());
        assert_eq!(store.get(&w1).await.unwrap().unwrap().data["v"], json!(1));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let err = store
            .set(&path("tasks", "t1"), DocumentData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(store.commit_count(), 0);

        store.set(&path("tasks", "t1"), DocumentData::new()).await.unwrap();
        assert_eq!(store.commit_count(), 1);

        store.fail_next_reads(1);
        assert!(store.get_all("tasks", &Query::all()).await.is_err());
        assert_eq!(store.get_all("tasks", &Query::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscription_sees_initial_and_committed_state() {
        let store = MemoryStore::new();
        store.set(&path("weeks", "w1"), DocumentData::new()).await.unwrap();

        let mut sub = store.subscribe("weeks", Query::all()).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.ids().collect::<Vec<_>>(), vec!["w1"]);

        store.set(&path("weeks", "w2"), DocumentData::new()).await.unwrap();
        store.set(&path("tasks", "t1"), DocumentData::new()).await.unwrap();

        let second = sub.next().await.unwrap().unwrap();
        assert!(second.seq > first.seq);
        assert_eq!(second.diff(Some(&first)).added, vec!["w2"]);
        assert!(sub.try_next().is_none());
    }
}
