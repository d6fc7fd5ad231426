//! Command-line interface for weekboard
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use crate::days;
use crate::error::{Error, Result};

mod context;
mod schedule;
mod task;
mod watch;
mod week;

/// weekboard - weekly schedule board
///
/// Keeps the placements of tasks on the weekly board in sync with the
/// tasks themselves, and task completion in sync with their placements.
#[derive(Parser, Debug)]
#[command(name = "weekboard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Board root holding `.weekboard.toml` and the data directory (defaults to current directory)
    #[arg(long, global = true, env = "WEEKBOARD_ROOT")]
    pub root: Option<PathBuf>,

    /// Actor recorded in task history
    #[arg(long, global = true, env = "WEEKBOARD_ACTOR")]
    pub actor: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit JSONL events to a file, or `-` for stdout
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Week document management
    #[command(subcommand)]
    Week(WeekCommands),

    /// Placement status
    #[command(subcommand)]
    Placement(PlacementCommands),

    /// Re-place a task on the board from its stored data
    Sync {
        /// Task ID
        id: String,
    },

    /// Recompute a task's completion from its placements
    Reconcile {
        /// Task ID
        id: String,
    },

    /// Stream changes of a collection as JSONL events
    Watch {
        #[arg(value_enum)]
        target: WatchTarget,

        /// Stop after this many snapshots
        #[arg(long)]
        count: Option<usize>,
    },
}

/// Editable task fields shared by `task add` and `task edit`
#[derive(clap::Args, Debug, Default)]
pub struct TaskFields {
    /// Status (forecast, awaiting_allocation, scheduled, done, cancelled or the board labels)
    #[arg(long)]
    pub status: Option<String>,

    /// Priority label
    #[arg(long)]
    pub priority: Option<String>,

    /// Area
    #[arg(long)]
    pub area: Option<String>,

    /// Action type tag (repeatable)
    #[arg(long = "action")]
    pub actions: Vec<String>,

    /// Assignee (repeatable)
    #[arg(short = 'a', long = "assignee")]
    pub assignees: Vec<String>,

    /// Shift
    #[arg(long)]
    pub shift: Option<String>,

    /// First day (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,

    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<String>,

    /// Guidance for whoever carries the task out
    #[arg(long)]
    pub guidance: Option<String>,
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    Add {
        /// Description
        description: String,

        #[command(flatten)]
        fields: TaskFields,
    },

    /// Edit a task; options not given keep their value, empty values clear
    Edit {
        /// Task ID
        id: String,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// Replace assignees and actions even when none are given
        #[arg(long)]
        clear_lists: bool,

        #[command(flatten)]
        fields: TaskFields,
    },

    /// Delete a task and its placements
    Delete {
        /// Task ID
        id: String,
    },

    /// List tasks
    List {
        /// Only tasks in this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a task
    Show {
        /// Task ID
        id: String,
    },

    /// Show a task's change history, newest first
    History {
        /// Task ID
        id: String,
    },
}

/// Week subcommands
#[derive(Subcommand, Debug)]
pub enum WeekCommands {
    /// Create the Monday-Saturday week containing a date
    Create {
        /// Any day of the week (YYYY-MM-DD)
        date: String,
    },

    /// List weeks
    List,

    /// Show a week's placements
    Show {
        /// Week ID
        id: String,
    },
}

/// Placement subcommands
#[derive(Subcommand, Debug)]
pub enum PlacementCommands {
    /// Set the local status of one placement and reconcile its task
    Set {
        /// Week ID
        #[arg(long)]
        week: String,

        /// Day (YYYY-MM-DD)
        #[arg(long)]
        day: String,

        /// Assignee
        #[arg(long)]
        assignee: String,

        /// Task ID
        #[arg(long)]
        task: String,

        /// pending or done
        status: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchTarget {
    Tasks,
    Weeks,
}

/// Options shared by every command
#[derive(Debug, Clone)]
pub(crate) struct GlobalOptions {
    pub root: Option<PathBuf>,
    pub actor: Option<String>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let global = GlobalOptions {
            root: self.root,
            actor: self.actor,
            json: self.json,
            quiet: self.quiet,
            events: self.events,
        };
        runtime.block_on(dispatch(self.command, global))
    }
}

async fn dispatch(command: Commands, global: GlobalOptions) -> Result<()> {
    match command {
        Commands::Task(cmd) => match cmd {
            TaskCommands::Add {
                description,
                fields,
            } => task::run_add(task::AddOptions {
                description,
                fields,
                global,
            })
            .await,
            TaskCommands::Edit {
                id,
                description,
                clear_lists,
                fields,
            } => task::run_edit(task::EditOptions {
                id,
                description,
                clear_lists,
                fields,
                global,
            })
            .await,
            TaskCommands::Delete { id } => task::run_delete(id, global).await,
            TaskCommands::List { status } => task::run_list(status, global).await,
            TaskCommands::Show { id } => task::run_show(id, global).await,
            TaskCommands::History { id } => task::run_history(id, global).await,
        },
        Commands::Week(cmd) => match cmd {
            WeekCommands::Create { date } => week::run_create(date, global).await,
            WeekCommands::List => week::run_list(global).await,
            WeekCommands::Show { id } => week::run_show(id, global).await,
        },
        Commands::Placement(PlacementCommands::Set {
            week,
            day,
            assignee,
            task,
            status,
        }) => {
            week::run_placement_set(week::PlacementSetOptions {
                week,
                day,
                assignee,
                task,
                status,
                global,
            })
            .await
        }
        Commands::Sync { id } => schedule::run_sync(id, global).await,
        Commands::Reconcile { id } => schedule::run_reconcile(id, global).await,
        Commands::Watch { target, count } => watch::run(target, count, global).await,
    }
}

/// Parse a day given on the command line.
pub(crate) fn parse_date(flag: &str, raw: &str) -> Result<NaiveDate> {
    days::parse_day_value(&serde_json::Value::String(raw.trim().to_string())).ok_or_else(|| {
        Error::InvalidArgument(format!("invalid {flag} '{raw}': expected YYYY-MM-DD"))
    })
}

pub(crate) fn parse_optional_date(flag: &str, raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|value| parse_date(flag, value)).transpose()
}
