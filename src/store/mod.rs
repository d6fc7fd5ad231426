//! Document store adapter.
//!
//! The schedule engine never talks to a concrete database. It receives an
//! `Arc<dyn DocumentStore>` and uses a small document-collection surface:
//!
//! - `get` / `get_all` reads (with an optional filter/order [`Query`])
//! - `set`, `set_merge`, `delete` single-document writes
//! - `commit` of a [`WriteBatch`]: every write applies or none does
//! - `subscribe`: a stream of immutable [`Snapshot`]s of a query
//!
//! Documents are JSON objects addressed by a [`DocPath`] (`collection/id`,
//! collections may nest: `tasks/<id>/history`). Every stored document has a
//! store-managed `revision` that starts at 1 and grows on every write;
//! batch writes may carry the revision they expect (0 = "must not exist")
//! and the whole batch is rejected with `Error::Conflict` on mismatch.
//!
//! Two implementations ship with the crate: [`MemoryStore`] (tests and
//! embedding) and [`FileStore`] (one JSON file per document on disk).

mod file;
mod memory;
mod watch;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub use file::{ExternalChanges, FileStore};
pub use memory::MemoryStore;
pub use watch::{Snapshot, SnapshotDiff, Subscription};

/// Body of a stored document.
pub type DocumentData = Map<String, Value>;

/// Address of a document: collection path plus document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    collection: String,
    id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let id = id.into();
        validate_collection(&collection)?;
        validate_segment(&id, "document id")?;
        Ok(Self { collection, id })
    }

    /// Parse `collection/id` (the last segment is the id).
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim().trim_matches('/');
        match raw.rsplit_once('/') {
            Some((collection, id)) => Self::new(collection, id),
            None => Err(Error::InvalidArgument(format!(
                "document path must look like <collection>/<id>: '{raw}'"
            ))),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Collection paths are one or more `/`-separated segments.
pub fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() {
        return Err(Error::InvalidArgument(
            "collection path cannot be empty".to_string(),
        ));
    }
    for segment in collection.split('/') {
        validate_segment(segment, "collection segment")?;
    }
    Ok(())
}

fn validate_segment(segment: &str, what: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment.trim() == segment
        && !segment.starts_with('.')
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("invalid {what}: '{segment}'")))
    }
}

/// A stored document as returned by reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: DocPath,
    pub revision: u64,
    pub data: DocumentData,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    /// Decode the document body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|err| {
            Error::MalformedDocument {
                path: self.path.to_string(),
                reason: err.to_string(),
            }
        })
    }
}

/// Encode a typed value as a document body. The value must serialize to an object.
pub fn encode<T: Serialize>(value: &T) -> Result<DocumentData> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidArgument(format!(
            "document body must be an object, got {other}"
        ))),
    }
}

/// Field filter for collection queries. Field names may use dotted paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    ArrayContains(String, Value),
}

impl Filter {
    fn matches(&self, data: &DocumentData) -> bool {
        match self {
            Filter::Eq(field, expected) => field_value(data, field) == Some(expected),
            Filter::In(field, allowed) => {
                field_value(data, field).is_some_and(|value| allowed.contains(value))
            }
            Filter::ArrayContains(field, expected) => field_value(data, field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(expected)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Collection query: filters, an optional order and an optional limit.
///
/// Results without an explicit order come back sorted by document id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    filters: Vec<Filter>,
    order_by: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &DocumentData) -> bool {
        self.filters.iter().all(|filter| filter.matches(data))
    }

    /// Filter, order and truncate documents already sorted by id.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(&doc.data))
            .collect();

        if let Some((field, direction)) = &self.order_by {
            selected.sort_by(|left, right| {
                let ordering = compare_values(
                    field_value(&left.data, field),
                    field_value(&right.data, field),
                )
                .then_with(|| left.path.cmp(&right.path));
                match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

fn field_value<'a>(data: &'a DocumentData, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Total order over JSON values: missing < null < bool < number < string < other.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Replace the whole document (create if missing).
    Set {
        path: DocPath,
        data: DocumentData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_revision: Option<u64>,
    },
    /// Deep-merge fields into the document (create if missing).
    Merge { path: DocPath, data: DocumentData },
    /// Remove the document; deleting a missing document is not an error.
    Delete {
        path: DocPath,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_revision: Option<u64>,
    },
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Merge { path, .. } | WriteOp::Delete { path, .. } => {
                path
            }
        }
    }
}

/// Atomic multi-document write: committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocPath, data: DocumentData) -> &mut Self {
        self.ops.push(WriteOp::Set {
            path,
            data,
            expected_revision: None,
        });
        self
    }

    /// Replace a document only if its revision is still `expected` (0 = absent).
    pub fn set_checked(&mut self, path: DocPath, data: DocumentData, expected: u64) -> &mut Self {
        self.ops.push(WriteOp::Set {
            path,
            data,
            expected_revision: Some(expected),
        });
        self
    }

    pub fn merge(&mut self, path: DocPath, data: DocumentData) -> &mut Self {
        self.ops.push(WriteOp::Merge { path, data });
        self
    }

    pub fn delete(&mut self, path: DocPath) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            path,
            expected_revision: None,
        });
        self
    }

    pub fn delete_checked(&mut self, path: DocPath, expected: u64) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            path,
            expected_revision: Some(expected),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Collections touched by this batch.
    pub fn collections(&self) -> BTreeSet<String> {
        self.ops
            .iter()
            .map(|op| op.path().collection().to_string())
            .collect()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CommitReceipt {
    /// New revision per written document; deleted documents are omitted.
    pub revisions: BTreeMap<DocPath, u64>,
    pub deleted: Vec<DocPath>,
}

/// Resolved effect of a batch on one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum PlannedWrite {
    Put(Document),
    Remove(DocPath),
}

/// Check preconditions and compute final document states for a batch.
///
/// `lookup` reads the committed state. Later ops in the same batch see the
/// effect of earlier ones. Fails without side effects on any mismatch.
pub(crate) fn plan_batch<F>(ops: Vec<WriteOp>, mut lookup: F) -> Result<Vec<PlannedWrite>>
where
    F: FnMut(&DocPath) -> Result<Option<Document>>,
{
    let mut overlay: BTreeMap<DocPath, Option<Document>> = BTreeMap::new();

    for op in ops {
        let path = op.path().clone();
        let current = match overlay.get(&path) {
            Some(state) => state.clone(),
            None => lookup(&path)?,
        };
        let current_revision = current.as_ref().map(|doc| doc.revision).unwrap_or(0);

        let next = match op {
            WriteOp::Set {
                data,
                expected_revision,
                ..
            } => {
                check_revision(&path, expected_revision, current_revision)?;
                Some(Document {
                    path: path.clone(),
                    revision: current_revision + 1,
                    data,
                })
            }
            WriteOp::Merge { data, .. } => {
                let mut merged = current.map(|doc| doc.data).unwrap_or_default();
                merge_into(&mut merged, data);
                Some(Document {
                    path: path.clone(),
                    revision: current_revision + 1,
                    data: merged,
                })
            }
            WriteOp::Delete {
                expected_revision, ..
            } => {
                check_revision(&path, expected_revision, current_revision)?;
                None
            }
        };
        overlay.insert(path, next);
    }

    Ok(overlay
        .into_iter()
        .map(|(path, state)| match state {
            Some(doc) => PlannedWrite::Put(doc),
            None => PlannedWrite::Remove(path),
        })
        .collect())
}

fn check_revision(path: &DocPath, expected: Option<u64>, found: u64) -> Result<()> {
    match expected {
        Some(expected) if expected != found => Err(Error::Conflict {
            path: path.to_string(),
            expected,
            found,
        }),
        _ => Ok(()),
    }
}

pub(crate) fn receipt_for(planned: &[PlannedWrite]) -> CommitReceipt {
    let mut receipt = CommitReceipt::default();
    for write in planned {
        match write {
            PlannedWrite::Put(doc) => {
                receipt.revisions.insert(doc.path.clone(), doc.revision);
            }
            PlannedWrite::Remove(path) => receipt.deleted.push(path.clone()),
        }
    }
    receipt
}

/// Deep merge: nested objects merge key by key, anything else replaces.
pub fn merge_into(target: &mut DocumentData, partial: DocumentData) {
    for (key, value) in partial {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Adapter over a document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document.
    async fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Read every document of a collection matching `query`.
    async fn get_all(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Commit a batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;

    /// Stream snapshots of `query` over `collection`.
    ///
    /// The first snapshot carries the current result set; another one
    /// follows every committed write touching the collection.
    async fn subscribe(&self, collection: &str, query: Query) -> Result<Subscription>;

    /// Replace a whole document.
    async fn set(&self, path: &DocPath, data: DocumentData) -> Result<u64> {
        let mut batch = WriteBatch::new();
        batch.set(path.clone(), data);
        self.commit(batch).await.map(|receipt| revision_of(&receipt, path))
    }

    /// Merge fields into a document, creating it if needed.
    async fn set_merge(&self, path: &DocPath, partial: DocumentData) -> Result<u64> {
        let mut batch = WriteBatch::new();
        batch.merge(path.clone(), partial);
        self.commit(batch).await.map(|receipt| revision_of(&receipt, path))
    }

    /// Delete a document.
    async fn delete(&self, path: &DocPath) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(path.clone());
        self.commit(batch).await.map(|_| ())
    }
}

fn revision_of(receipt: &CommitReceipt, path: &DocPath) -> u64 {
    receipt.revisions.get(path).copied().unwrap_or(0)
}
