//! weekboard sync and reconcile command implementations.

use serde::Serialize;

use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::reconcile::Reconciliation;
use crate::schedule::SyncReport;

use super::context::BoardContext;
use super::task::push_sync_summary;
use super::week::describe_reconciliation;
use super::GlobalOptions;

#[derive(Debug, Serialize)]
struct SyncOutput {
    id: String,
    #[serde(flatten)]
    report: SyncReport,
}

#[derive(Debug, Serialize)]
struct ReconcileOutput {
    id: String,
    #[serde(flatten)]
    reconciliation: Reconciliation,
}

pub(crate) async fn run_sync(id: String, global: GlobalOptions) -> Result<()> {
    let mut ctx = BoardContext::load(&global)?;
    let report = ctx.service.sync_task(&id).await?;
    let output = SyncOutput { id, report };
    let event_warning = ctx.emit(EventKind::TaskSynchronized, &output);

    let mut human = HumanOutput::new(format!("Task synchronized: {}", output.id));
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    push_sync_summary(&mut human, &output.report, ctx.config.schedule.auto_create_weeks);

    emit_success(ctx.output(), "sync", &output, Some(&human))
}

pub(crate) async fn run_reconcile(id: String, global: GlobalOptions) -> Result<()> {
    let mut ctx = BoardContext::load(&global)?;
    let reconciliation = ctx.service.reconcile(&id).await?;
    let output = ReconcileOutput { id, reconciliation };
    let event_warning = ctx.emit(EventKind::TaskReconciled, &output);

    let mut human = HumanOutput::new(format!("Task reconciled: {}", output.id));
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    human.push_summary("Result", describe_reconciliation(&output.reconciliation));

    emit_success(ctx.output(), "reconcile", &output, Some(&human))
}
