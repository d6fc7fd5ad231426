//! weekboard task command implementations.

use serde::Serialize;

use crate::changelog::ChangeEntry;
use crate::days;
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::schedule::{RemovalReport, SyncReport};
use crate::task::{Task, TaskDraft, TaskStatus};

use super::context::BoardContext;
use super::{parse_optional_date, GlobalOptions, TaskFields};

pub(crate) struct AddOptions {
    pub description: String,
    pub fields: TaskFields,
    pub global: GlobalOptions,
}

pub(crate) struct EditOptions {
    pub id: String,
    pub description: Option<String>,
    pub clear_lists: bool,
    pub fields: TaskFields,
    pub global: GlobalOptions,
}

#[derive(Debug, Serialize)]
struct TaskOutput {
    id: String,
    #[serde(flatten)]
    task: Task,
}

#[derive(Debug, Serialize)]
struct DeletedOutput {
    id: String,
    #[serde(flatten)]
    removed: RemovalReport,
}

#[derive(Debug, Serialize)]
struct HistoryOutput {
    id: String,
    entries: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    id: String,
    #[serde(flatten)]
    entry: ChangeEntry,
}

pub(crate) async fn run_add(options: AddOptions) -> Result<()> {
    let mut ctx = BoardContext::load(&options.global)?;
    let description = options.description.trim();
    if description.is_empty() {
        return Err(Error::InvalidArgument("description cannot be empty".to_string()));
    }

    let mut draft = TaskDraft {
        description: description.to_string(),
        ..TaskDraft::default()
    };
    apply_fields(&mut draft, options.fields, true)?;

    let created = ctx.service.create_task(draft, &ctx.actor).await?;
    let task = ctx.service.get_task(&created.id).await?;
    let event_warning = ctx.emit(EventKind::TaskCreated, &created);

    let mut human = HumanOutput::new("Task created");
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    human.push_summary("ID", created.id.clone());
    human.push_summary("Status", task.status.to_string());
    if let Some(sync) = &created.sync {
        push_sync_summary(&mut human, sync, ctx.config.schedule.auto_create_weeks);
    }

    emit_success(ctx.output(), "task add", &created, Some(&human))
}

pub(crate) async fn run_edit(options: EditOptions) -> Result<()> {
    let mut ctx = BoardContext::load(&options.global)?;
    let current = ctx.service.get_task(&options.id).await?;

    let mut draft = TaskDraft::from(&current);
    if let Some(description) = options.description {
        draft.description = description;
    }
    apply_fields(&mut draft, options.fields, options.clear_lists)?;

    let updated = ctx
        .service
        .update_task(&options.id, draft, &ctx.actor)
        .await?;
    let event_warning = ctx.emit(EventKind::TaskUpdated, &updated);

    let mut human = HumanOutput::new(format!("Task updated: {}", updated.id));
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    if updated.changes.is_empty() {
        human.push_summary("Changes", "none");
    }
    for change in &updated.changes {
        human.push_detail(change.clone());
    }
    push_sync_summary(&mut human, &updated.sync, ctx.config.schedule.auto_create_weeks);

    emit_success(ctx.output(), "task edit", &updated, Some(&human))
}

pub(crate) async fn run_delete(id: String, global: GlobalOptions) -> Result<()> {
    let mut ctx = BoardContext::load(&global)?;
    let removed = ctx.service.delete_task(&id, &ctx.actor).await?;
    let output = DeletedOutput { id, removed };
    let event_warning = ctx.emit(EventKind::TaskDeleted, &output);

    let mut human = HumanOutput::new(format!("Task deleted: {}", output.id));
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    human.push_summary("Placements removed", output.removed.placements_removed.to_string());
    human.push_summary("Weeks changed", output.removed.weeks_changed.len().to_string());

    emit_success(ctx.output(), "task delete", &output, Some(&human))
}

pub(crate) async fn run_list(status: Option<String>, global: GlobalOptions) -> Result<()> {
    let ctx = BoardContext::load(&global)?;
    let status = status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;
    let tasks: Vec<TaskOutput> = ctx
        .service
        .list_tasks(status)
        .await?
        .into_iter()
        .map(|(id, task)| TaskOutput { id, task })
        .collect();

    let mut human = HumanOutput::new(format!("Tasks ({})", tasks.len()));
    for entry in &tasks {
        human.push_detail(format!(
            "{}  {}  {}  {}",
            entry.id,
            entry.task.status,
            window_text(&entry.task),
            entry.task.description
        ));
    }

    emit_success(ctx.output(), "task list", &tasks, Some(&human))
}

pub(crate) async fn run_show(id: String, global: GlobalOptions) -> Result<()> {
    let ctx = BoardContext::load(&global)?;
    let task = ctx.service.get_task(&id).await?;

    let mut human = HumanOutput::new(format!("Task {id}"));
    human.push_summary("Description", task.description.clone());
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Window", window_text(&task));
    human.push_summary("Assignees", task.assignees.join(", "));
    if let Some(priority) = &task.priority {
        human.push_summary("Priority", priority.clone());
    }
    if let Some(shift) = &task.shift {
        human.push_summary("Shift", shift.clone());
    }
    if let Some(area) = &task.area {
        human.push_summary("Area", area.clone());
    }
    if !task.actions.is_empty() {
        human.push_summary("Actions", task.actions.join(", "));
    }
    if let Some(guidance) = &task.guidance {
        human.push_detail(guidance.clone());
    }

    emit_success(ctx.output(), "task show", &TaskOutput { id, task }, Some(&human))
}

pub(crate) async fn run_history(id: String, global: GlobalOptions) -> Result<()> {
    let ctx = BoardContext::load(&global)?;
    let entries: Vec<HistoryEntry> = ctx
        .service
        .history(&id)
        .await?
        .into_iter()
        .map(|entry| HistoryEntry {
            id: entry.id.clone(),
            entry,
        })
        .collect();

    let mut human = HumanOutput::new(format!("History of {id} ({})", entries.len()));
    for item in &entries {
        let mut line = format!(
            "{}  {}  {}",
            item.entry.timestamp.format("%Y-%m-%d %H:%M"),
            item.entry.actor_label,
            item.entry.action
        );
        if !item.entry.details.is_empty() {
            line.push_str(": ");
            line.push_str(&item.entry.details);
        }
        human.push_detail(line);
    }

    emit_success(
        ctx.output(),
        "task history",
        &HistoryOutput { id, entries },
        Some(&human),
    )
}

/// Overlay command-line fields on a draft.
///
/// List options replace the stored lists only when given, unless
/// `replace_lists` is set.
fn apply_fields(draft: &mut TaskDraft, fields: TaskFields, replace_lists: bool) -> Result<()> {
    if let Some(status) = fields.status {
        draft.status = Some(status.parse()?);
    }
    if let Some(priority) = fields.priority {
        draft.priority = Some(priority);
    }
    if let Some(area) = fields.area {
        draft.area = Some(area);
    }
    if replace_lists || !fields.actions.is_empty() {
        draft.actions = fields.actions;
    }
    if replace_lists || !fields.assignees.is_empty() {
        draft.assignees = fields.assignees;
    }
    if let Some(shift) = fields.shift {
        draft.shift = Some(shift);
    }
    if let Some(start) = parse_optional_date("--start", fields.start.as_deref())? {
        draft.start = Some(start);
    }
    if let Some(end) = parse_optional_date("--end", fields.end.as_deref())? {
        draft.end = Some(end);
    }
    if let Some(guidance) = fields.guidance {
        draft.guidance = Some(guidance);
    }
    Ok(())
}

fn window_text(task: &Task) -> String {
    match (task.start, task.end) {
        (Some(start), Some(end)) if start == end => days::day_key(start),
        (Some(start), Some(end)) => format!("{} .. {}", days::day_key(start), days::day_key(end)),
        _ => "-".to_string(),
    }
}

pub(crate) fn push_sync_summary(human: &mut HumanOutput, sync: &SyncReport, auto_create: bool) {
    human.push_summary("Placements removed", sync.removed.placements_removed.to_string());
    human.push_summary("Placements added", sync.placements_added.to_string());
    if let Some(reason) = &sync.skipped {
        human.push_summary("Not placed", reason.to_string());
    }
    if !sync.weeks_created.is_empty() {
        human.push_summary("Weeks created", sync.weeks_created.join(", "));
    }
    if let Some(first) = sync.uncovered_days.first() {
        human.push_warning(format!(
            "{} day(s) are outside every week and were not placed",
            sync.uncovered_days.len()
        ));
        if !auto_create {
            human.push_next_step(format!("weekboard week create {}", days::day_key(*first)));
        }
    }
}
