//! Realtime subscriptions: streams of immutable query snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::{Document, Query};
use crate::error::{Error, Result};

/// Result set of a subscribed query at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Store-wide sequence number; later snapshots have larger values.
    pub seq: u64,
    pub collection: String,
    pub documents: Arc<[Document]>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(Document::id)
    }

    /// Decode every document, failing on the first malformed one.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>> {
        self.documents
            .iter()
            .map(|doc| -> Result<(String, T)> { Ok((doc.id().to_string(), doc.decode()?)) })
            .collect()
    }

    /// Changes relative to an earlier snapshot of the same query.
    pub fn diff(&self, previous: Option<&Snapshot>) -> SnapshotDiff {
        let before: BTreeMap<&str, u64> = previous
            .map(|snap| {
                snap.documents
                    .iter()
                    .map(|doc| (doc.id(), doc.revision))
                    .collect()
            })
            .unwrap_or_default();
        let after: BTreeMap<&str, u64> = self
            .documents
            .iter()
            .map(|doc| (doc.id(), doc.revision))
            .collect();

        let mut diff = SnapshotDiff::default();
        for (id, revision) in &after {
            match before.get(id) {
                None => diff.added.push(id.to_string()),
                Some(old) if old != revision => diff.modified.push(id.to_string()),
                Some(_) => {}
            }
        }
        for id in before.keys() {
            if !after.contains_key(id) {
                diff.removed.push(id.to_string());
            }
        }
        diff
    }
}

/// Document ids that changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    collection: String,
    rx: mpsc::UnboundedReceiver<Result<Snapshot>>,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Wait for the next snapshot; `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Result<Snapshot>> {
        self.rx.recv().await
    }

    /// Take a snapshot that is already queued, without waiting.
    pub fn try_next(&mut self) -> Option<Result<Snapshot>> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

struct Subscriber {
    collection: String,
    query: Query,
    tx: mpsc::UnboundedSender<Result<Snapshot>>,
}

#[derive(Default)]
struct HubState {
    next_seq: u64,
    subscribers: Vec<Subscriber>,
}

/// Fan-out of snapshots to live subscriptions.
#[derive(Default)]
pub(crate) struct SubscriberHub {
    state: Mutex<HubState>,
}

impl SubscriberHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and queue its initial snapshot.
    pub(crate) fn register(
        &self,
        collection: &str,
        query: Query,
        initial: Result<Vec<Document>>,
    ) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        state.next_seq += 1;
        let seq = state.next_seq;
        let first = initial.map(|documents| Snapshot {
            seq,
            collection: collection.to_string(),
            documents: query.apply(documents).into(),
        });
        let _ = tx.send(first);

        state.subscribers.push(Subscriber {
            collection: collection.to_string(),
            query,
            tx,
        });

        Subscription {
            collection: collection.to_string(),
            rx,
        }
    }

    /// Push fresh snapshots to subscribers of the touched collections.
    ///
    /// `load` returns the full current contents of a collection; it is
    /// called once per touched collection that has live subscribers.
    pub(crate) fn publish<F>(&self, touched: &BTreeSet<String>, mut load: F)
    where
        F: FnMut(&str) -> Result<Vec<Document>>,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribers.retain(|sub| !sub.tx.is_closed());

        for collection in touched {
            if !state
                .subscribers
                .iter()
                .any(|sub| &sub.collection == collection)
            {
                continue;
            }

            let loaded = load(collection);
            state.next_seq += 1;
            let seq = state.next_seq;

            for sub in state
                .subscribers
                .iter()
                .filter(|sub| &sub.collection == collection)
            {
                let message = match &loaded {
                    Ok(documents) => Ok(Snapshot {
                        seq,
                        collection: collection.clone(),
                        documents: sub.query.apply(documents.iter().cloned()).into(),
                    }),
                    Err(err) => Err(Error::StoreUnavailable(err.to_string())),
                };
                let _ = sub.tx.send(message);
            }
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribers.retain(|sub| !sub.tx.is_closed());
        state.subscribers.len()
    }
}
