//! Shared setup for board commands: root, config, store, actor, event sink.

use std::sync::Arc;

use crate::changelog::Actor;
use crate::config::Config;
use crate::error::Result;
use crate::events::{Event, EventDestination, EventKind, EventSink};
use crate::output::OutputOptions;
use crate::service::TaskService;
use crate::store::FileStore;

use super::GlobalOptions;

pub(crate) struct BoardContext {
    pub config: Config,
    pub store: FileStore,
    pub service: TaskService,
    pub actor: Actor,
    pub events: Option<EventSink>,
    events_to_stdout: bool,
    json: bool,
    quiet: bool,
}

impl BoardContext {
    pub fn load(global: &GlobalOptions) -> Result<Self> {
        let root = match &global.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        let config = Config::load_from_root(&root);
        let store = FileStore::open(
            root.join(&config.store.data_dir),
            config.store.lock_timeout_ms,
        )?;
        let service = TaskService::new(Arc::new(store.clone()), &config);
        let actor = resolve_actor(global.actor.as_deref(), &config);

        let destination = EventDestination::parse(global.events.as_deref());
        let events = destination.as_ref().map(|dest| dest.open()).transpose()?;
        let events_to_stdout = matches!(destination, Some(EventDestination::Stdout));

        tracing::debug!(root = %root.display(), actor = actor.id(), "board context loaded");
        Ok(Self {
            config,
            store,
            service,
            actor,
            events,
            events_to_stdout,
            json: global.json,
            quiet: global.quiet,
        })
    }

    /// Output options; event output on stdout silences regular output.
    pub fn output(&self) -> OutputOptions {
        OutputOptions {
            json: self.json && !self.events_to_stdout,
            quiet: self.quiet || self.events_to_stdout,
        }
    }

    /// Emit an event if an event sink is configured; returns a warning on failure.
    pub fn emit<T: serde::Serialize>(&mut self, kind: EventKind, data: T) -> Option<String> {
        let sink = self.events.as_mut()?;
        let event = match Event::new(kind, Some(self.actor.id().to_string())).with_data(data) {
            Ok(event) => event,
            Err(err) => return Some(format!("event output failed: {err}")),
        };
        sink.emit(&event)
            .err()
            .map(|err| format!("event output failed: {err}"))
    }
}

fn resolve_actor(cli_actor: Option<&str>, config: &Config) -> Actor {
    match cli_actor.map(str::trim).filter(|actor| !actor.is_empty()) {
        Some(actor) => Actor::new(actor),
        None => Actor::new(config.actor.default.clone()),
    }
}
