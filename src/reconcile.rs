//! Completion reconciliation.
//!
//! A task's `DONE` status is a cached view of its placements: it holds only
//! when every expected (day, assignee) placement exists and is marked done.
//! Reconciliation recomputes that view from scratch and rewrites the
//! master status when it drifted.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::days;
use crate::error::Result;
use crate::store::{encode, DocumentStore};
use crate::task::{task_path, Task, TaskStatus};
use crate::week::WeekSet;

/// What reconciliation did to the master task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciliation {
    /// No such task; nothing to do.
    Missing,
    Unchanged { status: TaskStatus },
    Promoted,
    Demoted,
}

#[derive(Serialize)]
struct StatusPatch {
    status: TaskStatus,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Recompute the status of `task_id` from its placements.
    pub async fn reconcile_completion(&self, task_id: &str) -> Result<Reconciliation> {
        let path = task_path(task_id)?;
        let Some(doc) = self.store.get(&path).await? else {
            tracing::debug!(task = task_id, "task missing; nothing to reconcile");
            return Ok(Reconciliation::Missing);
        };
        let task: Task = doc.decode()?;

        if task.status == TaskStatus::Cancelled {
            return Ok(Reconciliation::Unchanged {
                status: task.status,
            });
        }

        let complete = match task.window() {
            Ok((start, end)) => {
                let weeks = WeekSet::load(self.store.as_ref()).await?;
                all_placements_done(&weeks, task_id, &task, start, end)
            }
            Err(reason) => {
                // Without a window the task cannot be schedule-backed.
                tracing::debug!(task = task_id, %reason, "task has no schedule window");
                if task.status != TaskStatus::Done {
                    return Ok(Reconciliation::Unchanged {
                        status: task.status,
                    });
                }
                false
            }
        };

        match (complete, task.status) {
            (true, status) if status != TaskStatus::Done => {
                self.write_status(task_id, TaskStatus::Done).await?;
                tracing::info!(task = task_id, "all placements done; task completed");
                Ok(Reconciliation::Promoted)
            }
            (false, TaskStatus::Done) => {
                self.write_status(task_id, TaskStatus::Scheduled).await?;
                tracing::info!(task = task_id, "task no longer complete; back to scheduled");
                Ok(Reconciliation::Demoted)
            }
            (_, status) => Ok(Reconciliation::Unchanged { status }),
        }
    }

    async fn write_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let patch = StatusPatch {
            status,
            updated_at: Utc::now(),
        };
        self.store
            .set_merge(&task_path(task_id)?, encode(&patch)?)
            .await?;
        Ok(())
    }
}

/// Whether every expected placement of the task exists and is done.
///
/// Stops at the first gap: a day no week covers, a missing placement, or a
/// pending one.
fn all_placements_done(
    weeks: &WeekSet,
    task_id: &str,
    task: &Task,
    start: NaiveDate,
    end: NaiveDate,
) -> bool {
    let mut any_found = false;
    for day in days::expand_days(start, end) {
        let Some(loaded) = weeks.containing(day) else {
            tracing::debug!(task = task_id, day = %day, "no week covers day; incomplete");
            return false;
        };
        for assignee in task.active_assignees() {
            match loaded.week.find(day, assignee, task_id) {
                None => {
                    tracing::warn!(
                        task = task_id,
                        week = %loaded.id,
                        day = %day,
                        assignee,
                        "expected placement is missing"
                    );
                    return false;
                }
                Some(placement) if !placement.local_status.is_done() => return false,
                Some(_) => any_found = true,
            }
        }
    }
    any_found
}
