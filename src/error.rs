//! Error types for weekboard
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown task or week, invalid config)
//! - 3: Write conflict (a document changed underneath a batch)
//! - 4: Operation failed (store unavailable, I/O, malformed data)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the weekboard CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const CONFLICT: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for weekboard operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Week not found: {0}")]
    WeekNotFound(String),

    // Conflicts (exit code 3)
    #[error("Revision conflict on {path}: expected {expected}, found {found}")]
    Conflict {
        path: String,
        expected: u64,
        found: u64,
    },

    // Operation failures (exit code 4)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed document {path}: {reason}")]
    MalformedDocument { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::TaskNotFound(_)
            | Error::WeekNotFound(_) => exit_codes::USER_ERROR,

            Error::Conflict { .. } => exit_codes::CONFLICT,

            Error::StoreUnavailable(_)
            | Error::MalformedDocument { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON error output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Conflict {
                path,
                expected,
                found,
            } => Some(serde_json::json!({
                "path": path,
                "expected_revision": expected,
                "found_revision": found,
            })),
            Error::MalformedDocument { path, reason } => Some(serde_json::json!({
                "path": path,
                "reason": reason,
            })),
            Error::TaskNotFound(id) => Some(serde_json::json!({ "task_id": id })),
            Error::WeekNotFound(id) => Some(serde_json::json!({ "week_id": id })),
            Error::InvalidConfig(message) => Some(serde_json::json!({ "message": message })),
            Error::LockFailed(path) => Some(serde_json::json!({
                "lock": path.display().to_string(),
            })),
            _ => None,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::StoreUnavailable(_) | Error::LockFailed(_)
        )
    }
}

/// Result type alias for weekboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
