//! weekboard - Weekly Schedule Board Library
//!
//! Tasks carry a date window and a list of assignees; weekly documents
//! hold, per day and per assignee, the placements of those tasks. This
//! library keeps the two in agreement.
//!
//! # Core Concepts
//!
//! - **Synchronization**: a task's placements are rebuilt from its window
//!   and assignees, atomically across every affected week
//! - **Reconciliation**: a task becomes done exactly when every expected
//!   placement is marked done, and falls back to scheduled otherwise
//! - **Change log**: every task mutation is recorded with its actor
//!
//! # Module Organization
//!
//! - `store`: document store trait, in-memory and file-backed stores
//! - `task`: task documents and their schedulable window
//! - `week`: week documents, placements, and the loaded week set
//! - `days`: calendar day expansion and week bounds
//! - `schedule`: the synchronizer
//! - `reconcile`: the completion reconciler
//! - `changelog`: per-task change history
//! - `service`: task operations combining the above
//! - `config`: configuration loading from `.weekboard.toml`
//! - `events`, `output`: JSONL events and command output
//! - `lock`: file locking and atomic writes
//! - `cli`: command-line interface using clap

pub mod changelog;
pub mod cli;
pub mod config;
pub mod days;
pub mod error;
pub mod events;
pub mod lock;
pub mod output;
pub mod reconcile;
pub mod schedule;
pub mod service;
pub mod store;
pub mod task;
pub mod week;

pub use error::{Error, Result};
pub use reconcile::{Reconciler, Reconciliation};
pub use schedule::{RemovalReport, SyncReport, Synchronizer};
pub use service::TaskService;
pub use store::{DocumentStore, FileStore, MemoryStore};
