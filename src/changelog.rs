//! Per-task audit history.
//!
//! Entries live in the `tasks/<id>/history` sub-collection. Appending is
//! fire-and-forget: a failed write is logged and swallowed so it never
//! blocks the task operation that produced it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::days;
use crate::error::Result;
use crate::store::{encode, DocPath, DocumentStore, Query};
use crate::task::{Task, TASKS};

/// Actor id recorded when no user is known.
pub const SYSTEM_ACTOR_ID: &str = "sistema";
pub const SYSTEM_ACTOR_LABEL: &str = "Sistema";
pub const UNKNOWN_ACTOR_LABEL: &str = "Desconhecido";

pub const TASK_CREATED: &str = "Tarefa Criada";
pub const TASK_UPDATED: &str = "Tarefa Atualizada";
pub const TASK_DELETED: &str = "Tarefa Excluída";

const NOT_SET: &str = "N/A";

/// Who performed a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub label: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR_ID)
    }

    /// Recorded id; blank ids are the system.
    pub fn id(&self) -> &str {
        let id = self.id.trim();
        if id.is_empty() {
            SYSTEM_ACTOR_ID
        } else {
            id
        }
    }

    /// Recorded label: the explicit one, else `Sistema` for the system and
    /// `Desconhecido` for anyone else.
    pub fn label(&self) -> &str {
        match self.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label,
            _ if self.id() == SYSTEM_ACTOR_ID => SYSTEM_ACTOR_LABEL,
            _ => UNKNOWN_ACTOR_LABEL,
        }
    }
}

/// One history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    #[serde(skip)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub actor_label: String,
    pub action: String,
    #[serde(default)]
    pub details: String,
}

pub fn history_collection(task_id: &str) -> String {
    format!("{TASKS}/{task_id}/history")
}

#[derive(Clone)]
pub struct ChangeLog {
    store: Arc<dyn DocumentStore>,
}

impl ChangeLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Append an entry; returns its id, or `None` when it could not be written.
    pub async fn append(
        &self,
        task_id: &str,
        actor: &Actor,
        action: &str,
        details: &str,
    ) -> Option<String> {
        match self.try_append(task_id, actor, action, details).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(task = task_id, action, error = %err, "failed to record task history");
                None
            }
        }
    }

    async fn try_append(
        &self,
        task_id: &str,
        actor: &Actor,
        action: &str,
        details: &str,
    ) -> Result<String> {
        let id = Ulid::new().to_string();
        let entry = ChangeEntry {
            id: id.clone(),
            timestamp: Utc::now(),
            actor_id: actor.id().to_string(),
            actor_label: actor.label().to_string(),
            action: action.to_string(),
            details: details.to_string(),
        };
        let path = DocPath::new(history_collection(task_id), id.as_str())?;
        self.store.set(&path, encode(&entry)?).await?;
        Ok(id)
    }

    /// History of a task, newest first.
    pub async fn entries(&self, task_id: &str) -> Result<Vec<ChangeEntry>> {
        let documents = self
            .store
            .get_all(&history_collection(task_id), &Query::all())
            .await?;
        let mut entries = Vec::with_capacity(documents.len());
        for doc in documents {
            match doc.decode::<ChangeEntry>() {
                Ok(mut entry) => {
                    entry.id = doc.id().to_string();
                    entries.push(entry);
                }
                Err(err) => tracing::warn!(error = %err, "skipping unreadable history entry"),
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }
}

/// Human-readable differences between two versions of a task.
pub fn describe_changes(old: &Task, new: &Task) -> Vec<String> {
    let mut changes = Vec::new();

    if old.description != new.description {
        changes.push(format!(
            "Descrição: '{}' -> '{}'",
            old.description, new.description
        ));
    }
    if old.status != new.status {
        changes.push(format!("Status: {} -> {}", old.status, new.status));
    }
    push_optional(&mut changes, "Prioridade", &old.priority, &new.priority);
    push_optional(&mut changes, "Área", &old.area, &new.area);
    if old.actions != new.actions {
        changes.push(format!(
            "Ação: {} -> {}",
            joined_or(&old.actions, NOT_SET),
            joined_or(&new.actions, NOT_SET)
        ));
    }
    if old.assignees != new.assignees {
        changes.push(format!(
            "Responsáveis: {} -> {}",
            joined_or(&old.assignees, "Nenhum"),
            joined_or(&new.assignees, "Nenhum")
        ));
    }
    push_optional(&mut changes, "Turno", &old.shift, &new.shift);
    if old.start != new.start {
        changes.push(format!(
            "Início: {} -> {}",
            day_or_unset(old.start),
            day_or_unset(new.start)
        ));
    }
    if old.end != new.end {
        changes.push(format!(
            "Término: {} -> {}",
            day_or_unset(old.end),
            day_or_unset(new.end)
        ));
    }
    if old.guidance != new.guidance {
        changes.push("Orientação alterada.".to_string());
    }
    changes
}

fn push_optional(changes: &mut Vec<String>, field: &str, old: &Option<String>, new: &Option<String>) {
    if old != new {
        changes.push(format!(
            "{field}: {} -> {}",
            old.as_deref().unwrap_or(NOT_SET),
            new.as_deref().unwrap_or(NOT_SET)
        ));
    }
}

fn joined_or(values: &[String], empty: &str) -> String {
    if values.is_empty() {
        empty.to_string()
    } else {
        values.join(", ")
    }
}

fn day_or_unset(day: Option<chrono::NaiveDate>) -> String {
    day.map(days::day_key).unwrap_or_else(|| NOT_SET.to_string())
}
