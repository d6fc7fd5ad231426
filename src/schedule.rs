//! Schedule synchronization: projecting tasks onto the weekly board.
//!
//! A task is kept on the board by full recompute-and-replace. Every call
//! first strips the task from every week, then, if the task is eligible,
//! places it again on each (day, assignee) of its window. Each phase
//! commits as one atomic batch guarded by the revisions it read.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::config::ScheduleConfig;
use crate::days;
use crate::error::Result;
use crate::store::DocumentStore;
use crate::task::{Ineligible, Task};
use crate::week::{Placement, WeekDocument, WeekSet};

/// Outcome of stripping a task from the board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub placements_removed: usize,
    pub weeks_changed: Vec<String>,
}

/// Outcome of a synchronize call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub removed: RemovalReport,
    /// Set when the task was not placed again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<Ineligible>,
    pub placements_added: usize,
    pub weeks_changed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub weeks_created: Vec<String>,
    /// Days of the window that no week covers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uncovered_days: Vec<NaiveDate>,
}

#[derive(Clone)]
pub struct Synchronizer {
    store: Arc<dyn DocumentStore>,
    config: ScheduleConfig,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn DocumentStore>, config: ScheduleConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Remove every placement referencing `task_id`, in one batch.
    pub async fn remove_placements(&self, task_id: &str) -> Result<RemovalReport> {
        let mut weeks = WeekSet::load(self.store.as_ref()).await?;
        let placements_removed = weeks.remove_task(task_id);
        let weeks_changed: Vec<String> = weeks.changed().map(|loaded| loaded.id.clone()).collect();

        if !weeks_changed.is_empty() {
            self.store.commit(weeks.to_batch()?).await?;
            tracing::info!(
                task = task_id,
                placements = placements_removed,
                weeks = weeks_changed.len(),
                "removed task from schedule"
            );
        }

        Ok(RemovalReport {
            placements_removed,
            weeks_changed,
        })
    }

    /// Bring the board in line with `task`.
    ///
    /// Errors leave the board in whatever state the last committed batch
    /// produced; the placement phase is never partially applied.
    pub async fn synchronize(&self, task_id: &str, task: &Task) -> Result<SyncReport> {
        let removed = self.remove_placements(task_id).await?;
        let mut report = SyncReport {
            removed,
            ..SyncReport::default()
        };

        let (start, end) = match task.placement_window() {
            Ok(window) => window,
            Err(reason) => {
                tracing::debug!(task = task_id, %reason, "task not placed on schedule");
                report.skipped = Some(reason);
                return Ok(report);
            }
        };

        let placement = Placement {
            task_id: task_id.to_string(),
            label: task.placement_label(&self.config.full_day_shift),
            shift: task.placement_shift(&self.config.full_day_shift),
            local_status: task.initial_local_status(),
            extra: Default::default(),
        };

        let mut weeks = WeekSet::load(self.store.as_ref()).await?;
        for day in days::expand_days(start, end) {
            if weeks.containing(day).is_none() && !self.cover_day(&mut weeks, day, &mut report) {
                tracing::debug!(task = task_id, day = %day, "no week covers day; skipping");
                report.uncovered_days.push(day);
                continue;
            }
            let Some(loaded) = weeks.containing_mut(day) else {
                continue;
            };
            for assignee in task.active_assignees() {
                if loaded.week.place(day, assignee, placement.clone()) {
                    loaded.mark_changed();
                    report.placements_added += 1;
                }
            }
        }

        report.weeks_changed = weeks.changed().map(|loaded| loaded.id.clone()).collect();
        if !report.weeks_changed.is_empty() {
            self.store.commit(weeks.to_batch()?).await?;
        }

        if !report.uncovered_days.is_empty() {
            tracing::warn!(
                task = task_id,
                days = report.uncovered_days.len(),
                "task days outside every week were not placed"
            );
        }
        tracing::info!(
            task = task_id,
            placements = report.placements_added,
            weeks = report.weeks_changed.len(),
            "task synchronized with schedule"
        );
        Ok(report)
    }

    /// Create the week covering `day` when configured to; returns whether it did.
    fn cover_day(&self, weeks: &mut WeekSet, day: NaiveDate, report: &mut SyncReport) -> bool {
        if !self.config.auto_create_weeks || day.weekday() == Weekday::Sun {
            return false;
        }
        let week = WeekDocument::for_day(day);
        let Some((start, _)) = week.range() else {
            return false;
        };
        let id = days::day_key(start);
        if weeks.get(&id).is_some() {
            tracing::warn!(week = %id, day = %day, "existing week does not cover its own dates");
            return false;
        }
        tracing::info!(week = %id, "creating week for scheduled day");
        weeks.insert_new(id.clone(), week);
        report.weeks_created.push(id);
        true
    }
}
