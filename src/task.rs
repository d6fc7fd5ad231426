//! Master task records.
//!
//! Tasks live in the `tasks` collection, one document per task. A task with
//! status `SCHEDULED` or `DONE`, a date range and at least one assignee is
//! projected onto the weekly board as placements (see `schedule`).

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::days;
use crate::error::{Error, Result};
use crate::store::DocPath;
use crate::week::LocalStatus;

/// Collection holding master tasks.
pub const TASKS: &str = "tasks";

/// Shift value meaning "the whole day".
pub const FULL_DAY_SHIFT: &str = "DIA INTEIRO";

/// Label used for tasks without a description.
pub const UNTITLED_TASK: &str = "Tarefa sem descrição";

pub fn task_path(task_id: &str) -> Result<DocPath> {
    DocPath::new(TASKS, task_id)
}

/// Lifecycle status of a master task.
///
/// Stored with the board's labels; the English names are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "PREVISTA", alias = "FORECAST")]
    Forecast,
    #[serde(rename = "AGUARDANDO ALOCAÇÃO", alias = "AWAITING_ALLOCATION")]
    AwaitingAllocation,
    #[serde(rename = "PROGRAMADA", alias = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "CONCLUÍDA", alias = "DONE")]
    Done,
    #[serde(rename = "CANCELADA", alias = "CANCELLED")]
    Cancelled,
}

const STATUS_NAMES: [(TaskStatus, &str, &[&str]); 5] = [
    (TaskStatus::Forecast, "PREVISTA", &["FORECAST"]),
    (
        TaskStatus::AwaitingAllocation,
        "AGUARDANDO ALOCAÇÃO",
        &["AWAITING_ALLOCATION", "AWAITING-ALLOCATION", "AGUARDANDO ALOCACAO"],
    ),
    (TaskStatus::Scheduled, "PROGRAMADA", &["SCHEDULED"]),
    (TaskStatus::Done, "CONCLUÍDA", &["DONE", "CONCLUIDA"]),
    (TaskStatus::Cancelled, "CANCELADA", &["CANCELLED", "CANCELED"]),
];

impl TaskStatus {
    /// Stored label of the status.
    pub fn as_str(self) -> &'static str {
        STATUS_NAMES
            .iter()
            .find(|(status, _, _)| *status == self)
            .map(|(_, label, _)| *label)
            .unwrap_or("")
    }

    /// Whether tasks in this status appear on the weekly board.
    pub fn is_schedulable(self) -> bool {
        matches!(self, TaskStatus::Scheduled | TaskStatus::Done)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::AwaitingAllocation
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let wanted = raw.trim().to_uppercase();
        STATUS_NAMES
            .iter()
            .find(|(_, label, aliases)| *label == wanted || aliases.contains(&wanted.as_str()))
            .map(|(status, _, _)| *status)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown task status '{raw}'")))
    }
}

/// Why a task produces no placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "status", rename_all = "snake_case")]
pub enum Ineligible {
    NotSchedulable(TaskStatus),
    NoAssignees,
    MissingDates,
    InvertedRange,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligible::NotSchedulable(status) => write!(f, "status {status} is not scheduled"),
            Ineligible::NoAssignees => f.write_str("no assignees"),
            Ineligible::MissingDates => f.write_str("missing start or end date"),
            Ineligible::InvertedRange => f.write_str("start date is after end date"),
        }
    }
}

/// A master task record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift: Option<String>,
    #[serde(
        default,
        deserialize_with = "days::lenient_day",
        skip_serializing_if = "Option::is_none"
    )]
    pub start: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "days::lenient_day",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Date range and assignees, if the task has a usable schedule window.
    pub fn window(&self) -> std::result::Result<(NaiveDate, NaiveDate), Ineligible> {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(Ineligible::MissingDates);
        };
        if self.active_assignees().next().is_none() {
            return Err(Ineligible::NoAssignees);
        }
        if start > end {
            return Err(Ineligible::InvertedRange);
        }
        Ok((start, end))
    }

    /// Non-blank assignees, in stored order.
    pub fn active_assignees(&self) -> impl Iterator<Item = &str> {
        self.assignees
            .iter()
            .map(|assignee| assignee.trim())
            .filter(|assignee| !assignee.is_empty())
    }

    /// Window of a task that should be on the board right now.
    pub fn placement_window(&self) -> std::result::Result<(NaiveDate, NaiveDate), Ineligible> {
        if !self.status.is_schedulable() {
            return Err(Ineligible::NotSchedulable(self.status));
        }
        self.window()
    }

    /// Board label: `[SHIFT] description - priority`.
    ///
    /// The shift prefix is omitted when the shift is unset or equals
    /// `full_day_shift` (case-insensitive).
    pub fn placement_label(&self, full_day_shift: &str) -> String {
        let mut label = String::new();
        if let Some(shift) = non_blank(self.shift.as_deref()) {
            let shift = shift.to_uppercase();
            if shift != full_day_shift.trim().to_uppercase() {
                label.push_str(&format!("[{shift}] "));
            }
        }

        match non_blank(Some(self.description.as_str())) {
            Some(description) => label.push_str(description),
            None => label.push_str(UNTITLED_TASK),
        }

        if let Some(priority) = non_blank(self.priority.as_deref()) {
            label.push_str(" - ");
            label.push_str(priority);
        }
        label
    }

    /// Shift stored on placements (full day when unset).
    pub fn placement_shift(&self, full_day_shift: &str) -> String {
        non_blank(self.shift.as_deref())
            .unwrap_or(full_day_shift)
            .to_string()
    }

    /// Local status given to freshly created placements.
    pub fn initial_local_status(&self) -> LocalStatus {
        if self.status == TaskStatus::Done {
            LocalStatus::Done
        } else {
            LocalStatus::Pending
        }
    }

    /// Drop blank and duplicate assignees, keeping first-seen order.
    pub fn normalize_assignees(&mut self) {
        let mut seen = HashSet::new();
        self.assignees = std::mem::take(&mut self.assignees)
            .into_iter()
            .map(|assignee| assignee.trim().to_string())
            .filter(|assignee| !assignee.is_empty() && seen.insert(assignee.clone()))
            .collect();
    }
}

/// Editable fields of a task, as submitted by a form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    pub description: String,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub shift: Option<String>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub guidance: Option<String>,
}

impl TaskDraft {
    /// Overwrite the editable fields of `task`, keeping its audit fields.
    ///
    /// A draft without a status keeps the task's current status.
    pub fn apply_to(self, task: &mut Task) {
        task.description = self.description.trim().to_string();
        if let Some(status) = self.status {
            task.status = status;
        }
        task.priority = self.priority.filter(|value| !value.trim().is_empty());
        task.area = self.area.filter(|value| !value.trim().is_empty());
        task.actions = self.actions;
        task.assignees = self.assignees;
        task.shift = self.shift.filter(|value| !value.trim().is_empty());
        task.start = self.start;
        task.end = self.end;
        task.guidance = self.guidance.filter(|value| !value.trim().is_empty());
        task.normalize_assignees();
    }
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        Self {
            description: task.description.clone(),
            status: Some(task.status),
            priority: task.priority.clone(),
            area: task.area.clone(),
            actions: task.actions.clone(),
            assignees: task.assignees.clone(),
            shift: task.shift.clone(),
            start: task.start,
            end: task.end,
            guidance: task.guidance.clone(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
