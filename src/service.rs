//! Task operations as the board performs them.
//!
//! Every mutation of a task runs the synchronizer afterwards, and every
//! toggle of a placement runs the reconciler, so callers never drive the
//! schedule engine by hand.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use serde::Serialize;
use uuid::Uuid;

use crate::changelog::{self, Actor, ChangeEntry, ChangeLog};
use crate::config::Config;
use crate::days;
use crate::error::{Error, Result};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::schedule::{RemovalReport, SyncReport, Synchronizer};
use crate::store::{encode, DocumentStore, Filter, Query, Subscription, WriteBatch};
use crate::task::{task_path, Task, TaskDraft, TaskStatus, TASKS};
use crate::week::{week_path, LoadedWeek, LocalStatus, WeekDocument, WeekSet, WEEKS};

/// Result of creating a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskCreated {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
}

/// Result of editing a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskUpdated {
    pub id: String,
    pub changes: Vec<String>,
    pub sync: SyncReport,
}

/// Result of toggling one placement.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementUpdate {
    /// False when the cell or placement did not exist.
    pub found: bool,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<Reconciliation>,
}

/// Result of creating a week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekCreated {
    pub id: String,
    pub created: bool,
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn DocumentStore>,
    synchronizer: Synchronizer,
    reconciler: Reconciler,
    changelog: ChangeLog,
}

impl TaskService {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            synchronizer: Synchronizer::new(Arc::clone(&store), config.schedule.clone()),
            reconciler: Reconciler::new(Arc::clone(&store)),
            changelog: ChangeLog::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Create a task and place it on the board when it is scheduled.
    pub async fn create_task(&self, draft: TaskDraft, actor: &Actor) -> Result<TaskCreated> {
        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let mut task = Task {
            created_by: Some(actor.id().to_string()),
            created_at: Some(now),
            updated_at: Some(now),
            ..Task::default()
        };
        draft.apply_to(&mut task);
        check_range(&task)?;

        let mut batch = WriteBatch::new();
        batch.set_checked(task_path(&id)?, encode(&task)?, 0);
        self.store.commit(batch).await?;
        tracing::info!(task = %id, status = %task.status, "task created");

        self.changelog
            .append(
                &id,
                actor,
                changelog::TASK_CREATED,
                &format!("Tarefa \"{}\" adicionada.", task.description),
            )
            .await;

        let sync = if task.status.is_schedulable() {
            Some(self.sync_task(&id).await?)
        } else {
            None
        };
        Ok(TaskCreated { id, sync })
    }

    /// Replace the editable fields of a task and resynchronize it.
    pub async fn update_task(
        &self,
        task_id: &str,
        draft: TaskDraft,
        actor: &Actor,
    ) -> Result<TaskUpdated> {
        let path = task_path(task_id)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        let old: Task = doc.decode()?;

        let mut task = old.clone();
        draft.apply_to(&mut task);
        check_range(&task)?;
        task.updated_at = Some(Utc::now());

        let mut batch = WriteBatch::new();
        batch.set_checked(path, encode(&task)?, doc.revision);
        self.store.commit(batch).await?;

        let changes = changelog::describe_changes(&old, &task);
        if !changes.is_empty() {
            self.changelog
                .append(task_id, actor, changelog::TASK_UPDATED, &changes.join("; "))
                .await;
        }
        tracing::info!(task = task_id, changes = changes.len(), "task updated");

        let sync = self.sync_task(task_id).await?;
        Ok(TaskUpdated {
            id: task_id.to_string(),
            changes,
            sync,
        })
    }

    /// Delete a task and every placement of it.
    pub async fn delete_task(&self, task_id: &str, actor: &Actor) -> Result<RemovalReport> {
        let task = self.get_task(task_id).await?;

        let name = if task.description.trim().is_empty() {
            format!("ID {task_id}")
        } else {
            task.description.clone()
        };
        self.changelog
            .append(
                task_id,
                actor,
                changelog::TASK_DELETED,
                &format!("Tarefa \"{name}\" foi removida."),
            )
            .await;

        let removed = self.synchronizer.remove_placements(task_id).await?;
        self.store.delete(&task_path(task_id)?).await?;
        tracing::info!(task = task_id, "task deleted");
        Ok(removed)
    }

    /// Re-read a task and synchronize the board with what is stored.
    pub async fn sync_task(&self, task_id: &str) -> Result<SyncReport> {
        let task = self.get_task(task_id).await?;
        self.synchronizer.synchronize(task_id, &task).await
    }

    pub async fn reconcile(&self, task_id: &str) -> Result<Reconciliation> {
        self.reconciler.reconcile_completion(task_id).await
    }

    /// Set the local status of one placement, then reconcile its task.
    ///
    /// A missing cell or placement is logged and ignored; a missing week is
    /// an error.
    pub async fn set_placement_status(
        &self,
        week_id: &str,
        day: NaiveDate,
        assignee: &str,
        task_id: &str,
        status: LocalStatus,
    ) -> Result<PlacementUpdate> {
        let path = week_path(week_id)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| Error::WeekNotFound(week_id.to_string()))?;
        let mut week: WeekDocument = doc.decode()?;

        let day_key = days::day_key(day);
        let Some(placement) = week.find_mut(&day_key, assignee, task_id) else {
            tracing::warn!(
                week = week_id,
                day = %day_key,
                assignee,
                task = task_id,
                "placement not found; nothing to update"
            );
            return Ok(PlacementUpdate {
                found: false,
                changed: false,
                reconciliation: None,
            });
        };

        let changed = placement.local_status != status;
        if changed {
            placement.local_status = status.clone();
            let mut batch = WriteBatch::new();
            batch.set_checked(path, encode(&week)?, doc.revision);
            self.store.commit(batch).await?;
            tracing::info!(week = week_id, day = %day_key, assignee, task = task_id, %status, "placement status set");
        }

        let reconciliation = self.reconciler.reconcile_completion(task_id).await?;
        Ok(PlacementUpdate {
            found: true,
            changed,
            reconciliation: Some(reconciliation),
        })
    }

    /// Create the Monday-Saturday week containing `day`, unless one covers it.
    pub async fn create_week(&self, day: NaiveDate) -> Result<WeekCreated> {
        if day.weekday() == Weekday::Sun {
            return Err(Error::InvalidArgument(format!(
                "{day} is a Sunday; board weeks run Monday to Saturday"
            )));
        }

        let weeks = WeekSet::load(self.store.as_ref()).await?;
        if let Some(existing) = weeks.containing(day) {
            return Ok(WeekCreated {
                id: existing.id.clone(),
                created: false,
            });
        }

        let week = WeekDocument::for_day(day);
        let (start, _) = days::week_bounds(day);
        let id = days::day_key(start);
        if weeks.get(&id).is_some() {
            return Err(Error::InvalidArgument(format!(
                "week {id} exists but has no usable date range; fix its week_start and week_end"
            )));
        }
        let mut batch = WriteBatch::new();
        batch.set_checked(week_path(&id)?, encode(&week)?, 0);
        self.store.commit(batch).await?;
        tracing::info!(week = %id, "week created");
        Ok(WeekCreated { id, created: true })
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.store
            .get(&task_path(task_id)?)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?
            .decode()
    }

    /// Tasks in id order, optionally restricted to one status.
    ///
    /// Undecodable tasks are skipped with a warning.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<(String, Task)>> {
        let mut query = Query::all();
        if let Some(status) = status {
            query = query.filter(Filter::Eq("status".to_string(), status.as_str().into()));
        }
        let documents = self.store.get_all(TASKS, &query).await?;
        let mut tasks = Vec::with_capacity(documents.len());
        for doc in documents {
            match doc.decode::<Task>() {
                Ok(task) => tasks.push((doc.id().to_string(), task)),
                Err(err) => tracing::warn!(error = %err, "skipping unreadable task"),
            }
        }
        Ok(tasks)
    }

    pub async fn get_week(&self, week_id: &str) -> Result<LoadedWeek> {
        let doc = self
            .store
            .get(&week_path(week_id)?)
            .await?
            .ok_or_else(|| Error::WeekNotFound(week_id.to_string()))?;
        LoadedWeek::from_document(&doc)
    }

    pub async fn list_weeks(&self) -> Result<Vec<LoadedWeek>> {
        Ok(WeekSet::load(self.store.as_ref()).await?.iter().cloned().collect())
    }

    pub async fn history(&self, task_id: &str) -> Result<Vec<ChangeEntry>> {
        self.changelog.entries(task_id).await
    }

    pub async fn watch_tasks(&self) -> Result<Subscription> {
        self.store.subscribe(TASKS, Query::all()).await
    }

    pub async fn watch_weeks(&self) -> Result<Subscription> {
        self.store.subscribe(WEEKS, Query::all()).await
    }
}

fn check_range(task: &Task) -> Result<()> {
    match (task.start, task.end) {
        (Some(start), Some(end)) if start > end => Err(Error::InvalidArgument(format!(
            "start date {start} is after end date {end}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn day(raw: &str) -> NaiveDate {
        days::parse_day_key(raw).unwrap()
    }

    fn draft(status: TaskStatus, start: &str, end: &str, assignees: &[&str]) -> TaskDraft {
        TaskDraft {
            description: "Trocar lâmpadas".to_string(),
            status: Some(status),
            assignees: assignees.iter().map(|a| a.to_string()).collect(),
            start: Some(day(start)),
            end: Some(day(end)),
            ..TaskDraft::default()
        }
    }

    async fn service_with_week(start: &str) -> (Arc<MemoryStore>, TaskService) {
        let store = Arc::new(MemoryStore::new());
        let service = TaskService::new(store.clone(), &Config::default());
        service.create_week(day(start)).await.unwrap();
        (store, service)
    }

    fn placements_of(week: &WeekDocument, task_id: &str) -> usize {
        week.placements_of(task_id).count()
    }

    #[tokio::test]
    async fn create_places_scheduled_tasks_and_logs() {
        let (_, service) = service_with_week("2024-01-01").await;
        let actor = Actor::new("ana");

        let created = service
            .create_task(draft(TaskStatus::Scheduled, "2024-01-02", "2024-01-03", &["A"]), &actor)
            .await
            .unwrap();
        assert_eq!(created.sync.as_ref().unwrap().placements_added, 2);

        let task = service.get_task(&created.id).await.unwrap();
        assert_eq!(task.created_by.as_deref(), Some("ana"));
        assert!(task.created_at.is_some());

        let week = service.get_week("2024-01-01").await.unwrap().week;
        assert_eq!(placements_of(&week, &created.id), 2);

        let history = service.history(&created.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, changelog::TASK_CREATED);
    }

    #[tokio::test]
    async fn create_without_status_waits_for_allocation() {
        let (_, service) = service_with_week("2024-01-01").await;
        let mut unscheduled = draft(TaskStatus::Scheduled, "2024-01-02", "2024-01-02", &["A"]);
        unscheduled.status = None;

        let created = service
            .create_task(unscheduled, &Actor::system())
            .await
            .unwrap();
        assert!(created.sync.is_none());
        assert_eq!(
            service.get_task(&created.id).await.unwrap().status,
            TaskStatus::AwaitingAllocation
        );
        let week = service.get_week("2024-01-01").await.unwrap().week;
        assert_eq!(placements_of(&week, &created.id), 0);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let (store, service) = service_with_week("2024-01-01").await;
        let before = store.len().await;
        let err = service
            .create_task(draft(TaskStatus::Scheduled, "2024-01-04", "2024-01-02", &["A"]), &Actor::system())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(store.len().await, before);
    }

    #[tokio::test]
    async fn update_moves_placements_and_records_changes() {
        let (_, service) = service_with_week("2024-01-01").await;
        let actor = Actor::system();
        let created = service
            .create_task(draft(TaskStatus::Scheduled, "2024-01-02", "2024-01-03", &["A"]), &actor)
            .await
            .unwrap();

        let updated = service
            .update_task(
                &created.id,
                draft(TaskStatus::Scheduled, "2024-01-04", "2024-01-04", &["A", "B"]),
                &actor,
            )
            .await
            .unwrap();

        assert_eq!(updated.sync.removed.placements_removed, 2);
        assert_eq!(updated.sync.placements_added, 2);
        assert_eq!(updated.changes.len(), 3);

        let week = service.get_week("2024-01-01").await.unwrap().week;
        assert!(week.find(day("2024-01-02"), "A", &created.id).is_none());
        assert!(week.find(day("2024-01-04"), "B", &created.id).is_some());

        let history = service.history(&created.id).await.unwrap();
        assert_eq!(history[0].action, changelog::TASK_UPDATED);
        assert!(history[0].details.contains("Responsáveis: A -> A, B"));
    }

    #[tokio::test]
    async fn unchanged_update_is_not_logged() {
        let (_, service) = service_with_week("2024-01-01").await;
        let created = service
            .create_task(draft(TaskStatus::Forecast, "2024-01-02", "2024-01-02", &["A"]), &Actor::system())
            .await
            .unwrap();
        let updated = service
            .update_task(
                &created.id,
                draft(TaskStatus::Forecast, "2024-01-02", "2024-01-02", &["A"]),
                &Actor::system(),
            )
            .await
            .unwrap();
        assert!(updated.changes.is_empty());
        assert_eq!(service.history(&created.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_task_fails() {
        let (_, service) = service_with_week("2024-01-01").await;
        let err = service
            .update_task("ghost", TaskDraft::default(), &Actor::system())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn delete_retracts_placements() {
        let (_, service) = service_with_week("2024-01-01").await;
        let created = service
            .create_task(draft(TaskStatus::Done, "2024-01-01", "2024-01-02", &["A", "B"]), &Actor::system())
            .await
            .unwrap();

        let removed = service.delete_task(&created.id, &Actor::system()).await.unwrap();
        assert_eq!(removed.placements_removed, 4);
        assert!(matches!(
            service.get_task(&created.id).await,
            Err(Error::TaskNotFound(_))
        ));
        let week = service.get_week("2024-01-01").await.unwrap().week;
        assert_eq!(placements_of(&week, &created.id), 0);

        let history = service.history(&created.id).await.unwrap();
        assert_eq!(history[0].action, changelog::TASK_DELETED);
    }

    #[tokio::test]
    async fn toggling_placements_drives_task_status() {
        let (_, service) = service_with_week("2024-01-01").await;
        let created = service
            .create_task(draft(TaskStatus::Scheduled, "2024-01-02", "2024-01-03", &["A"]), &Actor::system())
            .await
            .unwrap();
        let id = created.id.as_str();

        let first = service
            .set_placement_status("2024-01-01", day("2024-01-02"), "A", id, LocalStatus::Done)
            .await
            .unwrap();
        assert!(first.changed);
        assert_eq!(
            first.reconciliation,
            Some(Reconciliation::Unchanged {
                status: TaskStatus::Scheduled
            })
        );

        let second = service
            .set_placement_status("2024-01-01", day("2024-01-03"), "A", id, LocalStatus::Done)
            .await
            .unwrap();
        assert_eq!(second.reconciliation, Some(Reconciliation::Promoted));
        assert_eq!(service.get_task(id).await.unwrap().status, TaskStatus::Done);

        let back = service
            .set_placement_status("2024-01-01", day("2024-01-03"), "A", id, LocalStatus::Pending)
            .await
            .unwrap();
        assert_eq!(back.reconciliation, Some(Reconciliation::Demoted));
    }

    #[tokio::test]
    async fn toggling_missing_placement_is_a_no_op() {
        let (_, service) = service_with_week("2024-01-01").await;
        let update = service
            .set_placement_status("2024-01-01", day("2024-01-02"), "A", "t1", LocalStatus::Done)
            .await
            .unwrap();
        assert!(!update.found);

        let err = service
            .set_placement_status("2099-01-05", day("2099-01-05"), "A", "t1", LocalStatus::Done)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WeekNotFound(_)));
    }

    #[tokio::test]
    async fn create_week_is_idempotent_and_rejects_sundays() {
        let store = Arc::new(MemoryStore::new());
        let service = TaskService::new(store, &Config::default());

        let created = service.create_week(day("2024-01-03")).await.unwrap();
        assert_eq!(
            created,
            WeekCreated {
                id: "2024-01-01".to_string(),
                created: true
            }
        );
        let again = service.create_week(day("2024-01-06")).await.unwrap();
        assert!(!again.created);
        assert_eq!(service.list_weeks().await.unwrap().len(), 1);

        assert!(matches!(
            service.create_week(day("2024-01-07")).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn create_week_over_a_dateless_week_is_a_user_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                &week_path("2024-01-01").unwrap(),
                json!({"week_start": "soon", "days": {}}).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
        let service = TaskService::new(store, &Config::default());

        match service.create_week(day("2024-01-03")).await {
            Err(Error::InvalidArgument(message)) => assert!(message.contains("2024-01-01")),
            other => panic!("expected invalid argument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let (_, service) = service_with_week("2024-01-01").await;
        let actor = Actor::system();
        service
            .create_task(draft(TaskStatus::Scheduled, "2024-01-02", "2024-01-02", &["A"]), &actor)
            .await
            .unwrap();
        service
            .create_task(draft(TaskStatus::Forecast, "2024-01-02", "2024-01-02", &["A"]), &actor)
            .await
            .unwrap();

        assert_eq!(service.list_tasks(None).await.unwrap().len(), 2);
        let scheduled = service.list_tasks(Some(TaskStatus::Scheduled)).await.unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1.status, TaskStatus::Scheduled);
    }

    #[tokio::test]
    async fn watch_tasks_reports_creations() {
        let (_, service) = service_with_week("2024-01-01").await;
        let mut sub = service.watch_tasks().await.unwrap();
        let initial = sub.next().await.unwrap().unwrap();
        assert!(initial.is_empty());

        let created = service
            .create_task(draft(TaskStatus::Forecast, "2024-01-02", "2024-01-02", &["A"]), &Actor::system())
            .await
            .unwrap();
        let next = sub.next().await.unwrap().unwrap();
        assert_eq!(next.diff(Some(&initial)).added, vec![created.id]);
    }
}
