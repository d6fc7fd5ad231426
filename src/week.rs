//! Week documents: the weekly board.
//!
//! Each document in the `weeks` collection covers an inclusive range of
//! calendar days and holds `day -> assignee -> [Placement]`. A placement is
//! one task's projection onto one (day, assignee) cell, with its own local
//! completion flag.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::days;
use crate::error::{Error, Result};
use crate::store::{encode, DocPath, Document, DocumentStore, Query, WriteBatch};

/// Collection holding week documents.
pub const WEEKS: &str = "weeks";

pub fn week_path(week_id: &str) -> Result<DocPath> {
    DocPath::new(WEEKS, week_id)
}

/// Completion flag of a single placement.
///
/// Statuses written by other clients are kept verbatim as `Other` and
/// count as not done.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum LocalStatus {
    #[default]
    Pending,
    Done,
    Other(String),
}

impl LocalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LocalStatus::Pending => "PENDENTE",
            LocalStatus::Done => "CONCLUÍDA",
            LocalStatus::Other(raw) => raw,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, LocalStatus::Done)
    }

    fn from_stored(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "PENDENTE" | "PENDING" => LocalStatus::Pending,
            "CONCLUÍDA" | "CONCLUIDA" | "DONE" => LocalStatus::Done,
            _ => LocalStatus::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command-line input: only the two board statuses are accepted.
impl FromStr for LocalStatus {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match LocalStatus::from_stored(raw) {
            LocalStatus::Other(_) => Err(Error::InvalidArgument(format!(
                "unknown placement status '{raw}' (expected pending|done)"
            ))),
            status => Ok(status),
        }
    }
}

impl Serialize for LocalStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LocalStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(raw) => LocalStatus::from_stored(&raw),
            Value::Null => LocalStatus::Pending,
            other => LocalStatus::Other(other.to_string()),
        })
    }
}

/// One task placed on one (day, assignee) cell.
///
/// Every field is optional on read; fields this crate does not know are
/// carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, deserialize_with = "lenient_id")]
    pub task_id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub label: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub shift: String,
    #[serde(default)]
    pub local_status: LocalStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(raw) => raw,
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(raw) => raw,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Cells of one day: assignee -> ordered placements.
pub type DayCells = BTreeMap<String, Vec<Placement>>;

/// A weekly schedule container.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeekDocument {
    #[serde(
        default,
        deserialize_with = "days::lenient_day",
        skip_serializing_if = "Option::is_none"
    )]
    pub week_start: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "days::lenient_day",
        skip_serializing_if = "Option::is_none"
    )]
    pub week_end: Option<NaiveDate>,
    #[serde(default, deserialize_with = "sparse_days")]
    pub days: BTreeMap<String, DayCells>,
    /// Fields this crate does not interpret; kept on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Read `days`, treating `null` days and cells as empty.
///
/// Anything that is not an object where a day or a placement is expected
/// is dropped with a warning rather than failing the whole week.
fn sparse_days<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, DayCells>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::Object(raw) => raw,
        Value::Null => return Ok(BTreeMap::new()),
        other => {
            tracing::warn!(found = %other, "ignoring days that are not an object");
            return Ok(BTreeMap::new());
        }
    };

    let mut days = BTreeMap::new();
    for (day, cells) in raw {
        let cells = match cells {
            Value::Object(cells) => cells
                .into_iter()
                .map(|(assignee, placements)| {
                    let placements = read_cell(&day, &assignee, placements);
                    (assignee, placements)
                })
                .collect(),
            Value::Null => DayCells::new(),
            other => {
                tracing::warn!(day = %day, found = %other, "ignoring day that is not an object");
                DayCells::new()
            }
        };
        days.insert(day, cells);
    }
    Ok(days)
}

fn read_cell(day: &str, assignee: &str, raw: Value) -> Vec<Placement> {
    let entries = match raw {
        Value::Array(entries) => entries,
        Value::Null => return Vec::new(),
        other => vec![other],
    };
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Placement>(entry) {
            Ok(placement) => Some(placement),
            Err(err) => {
                tracing::warn!(day, assignee, error = %err, "dropping unreadable placement");
                None
            }
        })
        .collect()
}

impl WeekDocument {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            week_start: Some(start),
            week_end: Some(end),
            ..Self::default()
        }
    }

    /// The Monday-Saturday week containing `day`.
    pub fn for_day(day: NaiveDate) -> Self {
        let (start, end) = days::week_bounds(day);
        Self::new(start, end)
    }

    /// Inclusive day range, when both ends are usable.
    pub fn range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.week_start, self.week_end) {
            (Some(start), Some(end)) if start <= end => Some((start, end)),
            _ => None,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.range()
            .is_some_and(|(start, end)| start <= day && day <= end)
    }

    /// Placement of `task_id` in a cell, if any.
    pub fn find(&self, day: NaiveDate, assignee: &str, task_id: &str) -> Option<&Placement> {
        self.days
            .get(&days::day_key(day))?
            .get(assignee)?
            .iter()
            .find(|placement| placement.task_id == task_id)
    }

    pub fn find_mut(
        &mut self,
        day_key: &str,
        assignee: &str,
        task_id: &str,
    ) -> Option<&mut Placement> {
        self.days
            .get_mut(day_key)?
            .get_mut(assignee)?
            .iter_mut()
            .find(|placement| placement.task_id == task_id)
    }

    /// Append a placement unless the cell already holds one for the same task.
    ///
    /// Days outside the week's range are refused. Returns whether the
    /// document changed.
    pub fn place(&mut self, day: NaiveDate, assignee: &str, placement: Placement) -> bool {
        if !self.contains(day) {
            tracing::debug!(day = %day, "refusing placement outside week range");
            return false;
        }
        let cell = self
            .days
            .entry(days::day_key(day))
            .or_default()
            .entry(assignee.to_string())
            .or_default();
        if cell.iter().any(|existing| existing.task_id == placement.task_id) {
            return false;
        }
        cell.push(placement);
        true
    }

    /// Remove every placement of `task_id`; returns how many were removed.
    pub fn remove_task(&mut self, task_id: &str) -> usize {
        let mut removed = 0;
        for cells in self.days.values_mut() {
            for placements in cells.values_mut() {
                let before = placements.len();
                placements.retain(|placement| placement.task_id != task_id);
                removed += before - placements.len();
            }
        }
        removed
    }

    /// Every `(day key, assignee, placement)` referencing `task_id`.
    pub fn placements_of<'a>(
        &'a self,
        task_id: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str, &'a Placement)> + 'a {
        self.days.iter().flat_map(move |(day, cells)| {
            cells.iter().flat_map(move |(assignee, placements)| {
                placements
                    .iter()
                    .filter(move |placement| placement.task_id == task_id)
                    .map(move |placement| (day.as_str(), assignee.as_str(), placement))
            })
        })
    }
}

/// A week document read from the store, with its revision.
#[derive(Debug, Clone)]
pub struct LoadedWeek {
    pub id: String,
    pub revision: u64,
    pub week: WeekDocument,
    changed: bool,
}

impl LoadedWeek {
    /// Decode a stored week document.
    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(Self {
            id: doc.id().to_string(),
            revision: doc.revision,
            week: doc.decode()?,
            changed: false,
        })
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// New documents have revision 0 until committed.
    pub fn is_new(&self) -> bool {
        self.revision == 0
    }
}

/// Working copy of every week document, loaded in one collection read.
#[derive(Debug, Clone, Default)]
pub struct WeekSet {
    weeks: Vec<LoadedWeek>,
}

impl WeekSet {
    /// Load all weeks. Undecodable documents are skipped with a warning.
    pub async fn load(store: &dyn DocumentStore) -> Result<Self> {
        let documents = store.get_all(WEEKS, &Query::all()).await?;
        let mut weeks = Vec::with_capacity(documents.len());

        for doc in documents {
            match LoadedWeek::from_document(&doc) {
                Ok(loaded) => {
                    if loaded.week.range().is_none() {
                        tracing::warn!(
                            week = %loaded.id,
                            "week has no usable date range; it will not receive placements"
                        );
                    }
                    weeks.push(loaded);
                }
                Err(err) => {
                    tracing::warn!(week = doc.id(), error = %err, "skipping malformed week");
                }
            }
        }

        Ok(Self { weeks })
    }

    pub fn len(&self) -> usize {
        self.weeks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadedWeek> {
        self.weeks.iter()
    }

    pub fn get(&self, id: &str) -> Option<&LoadedWeek> {
        self.weeks.iter().find(|loaded| loaded.id == id)
    }

    fn position_containing(&self, day: NaiveDate) -> Option<usize> {
        let mut matches = self
            .weeks
            .iter()
            .enumerate()
            .filter(|(_, loaded)| loaded.week.contains(day))
            .map(|(idx, _)| idx);
        let first = matches.next()?;
        if matches.next().is_some() {
            tracing::warn!(
                day = %day,
                week = %self.weeks[first].id,
                "several weeks cover the same day; using the first"
            );
        }
        Some(first)
    }

    /// The week whose range contains `day` (first by id if several do).
    pub fn containing(&self, day: NaiveDate) -> Option<&LoadedWeek> {
        self.position_containing(day).map(|idx| &self.weeks[idx])
    }

    pub fn containing_mut(&mut self, day: NaiveDate) -> Option<&mut LoadedWeek> {
        self.position_containing(day)
            .map(move |idx| &mut self.weeks[idx])
    }

    /// Add a week that does not exist in the store yet.
    pub fn insert_new(&mut self, id: String, week: WeekDocument) -> &mut LoadedWeek {
        let idx = self
            .weeks
            .iter()
            .position(|loaded| loaded.id > id)
            .unwrap_or(self.weeks.len());
        self.weeks.insert(
            idx,
            LoadedWeek {
                id,
                revision: 0,
                week,
                changed: true,
            },
        );
        &mut self.weeks[idx]
    }

    /// Strip `task_id` from every week; returns placements removed.
    pub fn remove_task(&mut self, task_id: &str) -> usize {
        let mut removed = 0;
        for loaded in &mut self.weeks {
            let count = loaded.week.remove_task(task_id);
            if count > 0 {
                loaded.mark_changed();
                removed += count;
            }
        }
        removed
    }

    pub fn changed(&self) -> impl Iterator<Item = &LoadedWeek> {
        self.weeks.iter().filter(|loaded| loaded.changed)
    }

    /// Batch rewriting every changed week, guarded by the revision it was read at.
    pub fn to_batch(&self) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        for loaded in self.changed() {
            batch.set_checked(week_path(&loaded.id)?, encode(&loaded.week)?, loaded.revision);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(raw: &str) -> NaiveDate {
        days::parse_day_key(raw).unwrap()
    }

    fn placement(task_id: &str) -> Placement {
        Placement {
            task_id: task_id.to_string(),
            label: task_id.to_uppercase(),
            shift: "DIA INTEIRO".to_string(),
            local_status: LocalStatus::Pending,
            extra: Map::new(),
        }
    }

    #[test]
    fn place_is_idempotent_per_task() {
        let mut week = WeekDocument::new(day("2024-01-01"), day("2024-01-06"));
        assert!(week.place(day("2024-01-02"), "ana", placement("t1")));
        assert!(!week.place(day("2024-01-02"), "ana", placement("t1")));
        assert!(week.place(day("2024-01-02"), "ana", placement("t2")));
        assert!(!week.place(day("2024-01-08"), "ana", placement("t1")));

        assert_eq!(week.days["2024-01-02"]["ana"].len(), 2);
        assert!(week.find(day("2024-01-02"), "ana", "t2").is_some());
        assert!(week.find(day("2024-01-03"), "ana", "t2").is_none());
    }

    #[test]
    fn remove_task_counts_removed_placements() {
        let mut week = WeekDocument::new(day("2024-01-01"), day("2024-01-06"));
        week.place(day("2024-01-01"), "ana", placement("t1"));
        week.place(day("2024-01-01"), "bia", placement("t1"));
        week.place(day("2024-01-02"), "ana", placement("t2"));

        assert_eq!(week.placements_of("t1").count(), 2);
        assert_eq!(week.remove_task("t1"), 2);
        assert_eq!(week.remove_task("t1"), 0);
        assert_eq!(week.placements_of("t1").count(), 0);
        assert_eq!(week.placements_of("t2").count(), 1);
    }

    #[test]
    fn decodes_stored_shapes_and_keeps_extra_fields() {
        let week: WeekDocument = serde_json::from_value(json!({
            "week_start": {"seconds": 1704067200, "nanoseconds": 0},
            "week_end": "2024-01-06T12:00:00Z",
            "label": "Semana 1",
            "days": {
                "2024-01-01": {
                    "ana": [{"task_id": "t1", "label": "T1", "local_status": "CONCLUÍDA"}],
                    "bia": null
                },
                "2024-01-02": null
            }
        }))
        .unwrap();

        assert_eq!(week.range(), Some((day("2024-01-01"), day("2024-01-06"))));
        assert_eq!(week.extra["label"], json!("Semana 1"));
        assert!(week.days["2024-01-01"]["bia"].is_empty());
        assert!(week.days["2024-01-02"].is_empty());
        let found = week.find(day("2024-01-01"), "ana", "t1").unwrap();
        assert_eq!(found.local_status, LocalStatus::Done);
        assert_eq!(found.shift, "");

        let encoded = serde_json::to_value(&week).unwrap();
        assert_eq!(encoded["week_start"], json!("2024-01-01"));
        assert_eq!(encoded["label"], json!("Semana 1"));
    }

    #[test]
    fn unusable_dates_leave_week_without_range() {
        let week: WeekDocument = serde_json::from_value(json!({
            "week_start": "soon",
            "week_end": "2024-01-06"
        }))
        .unwrap();
        assert_eq!(week.range(), None);
        assert!(!week.contains(day("2024-01-03")));
    }

    #[test]
    fn local_status_parsing() {
        assert_eq!("done".parse::<LocalStatus>().unwrap(), LocalStatus::Done);
        assert_eq!("PENDENTE".parse::<LocalStatus>().unwrap(), LocalStatus::Pending);
        assert!("maybe".parse::<LocalStatus>().is_err());
    }

    #[test]
    fn odd_placements_decode_and_survive_rewrite() {
        let mut week: WeekDocument = serde_json::from_value(json!({
            "week_start": "2024-01-01",
            "week_end": "2024-01-06",
            "days": {
                "2024-01-02": {
                    "ana": [
                        {"task_id": "t1", "label": "T1", "local_status": "PENDENTE"},
                        {"task_id": "other"},
                        {"task_id": "t3", "label": "T3", "local_status": "EM ANDAMENTO", "color": "red"},
                        "not a placement"
                    ],
                    "bia": {"task_id": "t1", "label": "T1"}
                },
                "2024-01-03": "junk"
            }
        }))
        .unwrap();

        let cell = &week.days["2024-01-02"]["ana"];
        assert_eq!(cell.len(), 3);
        assert_eq!(cell[1].label, "");
        assert_eq!(cell[2].local_status, LocalStatus::Other("EM ANDAMENTO".to_string()));
        assert!(!cell[2].local_status.is_done());
        assert_eq!(week.days["2024-01-02"]["bia"].len(), 1);
        assert!(week.days["2024-01-03"].is_empty());

        assert_eq!(week.remove_task("t1"), 2);
        let encoded = serde_json::to_value(&week).unwrap();
        let ana = &encoded["days"]["2024-01-02"]["ana"];
        assert_eq!(ana.as_array().map(Vec::len), Some(2));
        assert_eq!(ana[1]["local_status"], json!("EM ANDAMENTO"));
        assert_eq!(ana[1]["color"], json!("red"));
    }
}
