//! weekboard week and placement command implementations.

use serde::Serialize;

use crate::days;
use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::reconcile::Reconciliation;
use crate::week::{LocalStatus, WeekDocument};

use super::context::BoardContext;
use super::{parse_date, GlobalOptions};

pub(crate) struct PlacementSetOptions {
    pub week: String,
    pub day: String,
    pub assignee: String,
    pub task: String,
    pub status: String,
    pub global: GlobalOptions,
}

#[derive(Debug, Serialize)]
struct WeekOutput {
    id: String,
    revision: u64,
    #[serde(flatten)]
    week: WeekDocument,
}

#[derive(Debug, Serialize)]
struct WeekSummary {
    id: String,
    revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    week_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    week_end: Option<String>,
    placements: usize,
}

#[derive(Debug, Serialize)]
struct PlacementSetOutput {
    week: String,
    day: String,
    assignee: String,
    task: String,
    status: LocalStatus,
    #[serde(flatten)]
    update: crate::service::PlacementUpdate,
}

pub(crate) async fn run_create(date: String, global: GlobalOptions) -> Result<()> {
    let mut ctx = BoardContext::load(&global)?;
    let day = parse_date("date", &date)?;
    let created = ctx.service.create_week(day).await?;

    let event_warning = if created.created {
        ctx.emit(EventKind::WeekCreated, &created)
    } else {
        None
    };

    let header = if created.created {
        format!("Week created: {}", created.id)
    } else {
        format!("Week already exists: {}", created.id)
    };
    let mut human = HumanOutput::new(header);
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    let (start, end) = days::week_bounds(day);
    if created.created {
        human.push_summary("Days", format!("{} .. {}", days::day_key(start), days::day_key(end)));
    }

    emit_success(ctx.output(), "week create", &created, Some(&human))
}

pub(crate) async fn run_list(global: GlobalOptions) -> Result<()> {
    let ctx = BoardContext::load(&global)?;
    let weeks: Vec<WeekSummary> = ctx
        .service
        .list_weeks()
        .await?
        .into_iter()
        .map(|loaded| WeekSummary {
            placements: count_placements(&loaded.week),
            week_start: loaded.week.week_start.map(days::day_key),
            week_end: loaded.week.week_end.map(days::day_key),
            id: loaded.id,
            revision: loaded.revision,
        })
        .collect();

    let mut human = HumanOutput::new(format!("Weeks ({})", weeks.len()));
    for week in &weeks {
        human.push_detail(format!(
            "{}  {} .. {}  {} placement(s)",
            week.id,
            week.week_start.as_deref().unwrap_or("?"),
            week.week_end.as_deref().unwrap_or("?"),
            week.placements
        ));
    }

    emit_success(ctx.output(), "week list", &weeks, Some(&human))
}

pub(crate) async fn run_show(id: String, global: GlobalOptions) -> Result<()> {
    let ctx = BoardContext::load(&global)?;
    let loaded = ctx.service.get_week(&id).await?;
    let (revision, week) = (loaded.revision, loaded.week);

    let mut human = HumanOutput::new(format!("Week {id}"));
    if let Some((start, end)) = week.range() {
        human.push_summary("Days", format!("{} .. {}", days::day_key(start), days::day_key(end)));
    } else {
        human.push_warning("week has no usable date range");
    }
    for (day, cells) in &week.days {
        for (assignee, placements) in cells {
            for placement in placements {
                human.push_detail(format!(
                    "{day}  {assignee}  [{}]  {}  ({})",
                    placement.local_status, placement.label, placement.task_id
                ));
            }
        }
    }

    emit_success(
        ctx.output(),
        "week show",
        &WeekOutput { id, revision, week },
        Some(&human),
    )
}

pub(crate) async fn run_placement_set(options: PlacementSetOptions) -> Result<()> {
    let mut ctx = BoardContext::load(&options.global)?;
    let day = parse_date("day", &options.day)?;
    let status: LocalStatus = options.status.parse()?;

    let update = ctx
        .service
        .set_placement_status(&options.week, day, &options.assignee, &options.task, status.clone())
        .await?;
    let output = PlacementSetOutput {
        week: options.week,
        day: days::day_key(day),
        assignee: options.assignee,
        task: options.task,
        status,
        update,
    };

    let mut event_warnings = Vec::new();
    if output.update.changed {
        event_warnings.extend(ctx.emit(EventKind::PlacementStatusChanged, &output));
    }
    if matches!(
        output.update.reconciliation,
        Some(Reconciliation::Promoted | Reconciliation::Demoted)
    ) {
        event_warnings.extend(ctx.emit(EventKind::TaskReconciled, &output.update.reconciliation));
    }

    let mut human = HumanOutput::new(format!(
        "Placement {} / {} / {}",
        output.day, output.assignee, output.task
    ));
    for warning in event_warnings {
        human.push_warning(warning);
    }
    if !output.update.found {
        human.push_warning("placement not found; nothing changed");
    } else {
        human.push_summary("Status", output.status.to_string());
    }
    if let Some(reconciliation) = &output.update.reconciliation {
        human.push_summary("Task", describe_reconciliation(reconciliation));
    }

    emit_success(ctx.output(), "placement set", &output, Some(&human))
}

pub(crate) fn describe_reconciliation(reconciliation: &Reconciliation) -> String {
    match reconciliation {
        Reconciliation::Missing => "not found".to_string(),
        Reconciliation::Unchanged { status } => format!("unchanged ({status})"),
        Reconciliation::Promoted => "completed".to_string(),
        Reconciliation::Demoted => "back to scheduled".to_string(),
    }
}

fn count_placements(week: &WeekDocument) -> usize {
    week.days
        .values()
        .flat_map(|cells| cells.values())
        .map(Vec::len)
        .sum()
}
