//! weekboard watch command implementation.
//!
//! Streams one JSONL event per snapshot of the watched collection: the
//! current contents first, then every change, including changes written
//! by other weekboard processes.

use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventSink};
use crate::store::Snapshot;

use super::context::BoardContext;
use super::{GlobalOptions, WatchTarget};

pub(crate) async fn run(
    target: WatchTarget,
    count: Option<usize>,
    global: GlobalOptions,
) -> Result<()> {
    let ctx = BoardContext::load(&global)?;
    let (collection, kind, mut subscription) = match target {
        WatchTarget::Tasks => (
            crate::task::TASKS,
            EventKind::TasksChanged,
            ctx.service.watch_tasks().await?,
        ),
        WatchTarget::Weeks => (
            crate::week::WEEKS,
            EventKind::WeeksChanged,
            ctx.service.watch_weeks().await?,
        ),
    };
    let _follow = ctx.store.follow_external_changes(collection)?;
    let mut sink = ctx.events.unwrap_or_else(EventSink::stdout);

    let mut previous: Option<Snapshot> = None;
    let mut emitted = 0usize;
    while count.map_or(true, |limit| emitted < limit) {
        let next = tokio::select! {
            next = subscription.next() => next,
            _ = tokio::signal::ctrl_c() => break,
        };
        let snapshot = match next {
            Some(snapshot) => snapshot?,
            None => {
                return Err(Error::OperationFailed(
                    "subscription closed unexpectedly".to_string(),
                ))
            }
        };
        if previous.is_some() && snapshot.diff(previous.as_ref()).is_empty() {
            continue;
        }
        sink.emit(&Event::from_snapshot(kind, &snapshot, previous.as_ref())?)?;
        emitted += 1;
        previous = Some(snapshot);
    }

    tracing::debug!(collection, emitted, "watch finished");
    Ok(())
}
