//! Error types for the restore workflow

use std::fmt::Display;
use std::path::PathBuf;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop a restore run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{tool} not found. {hint}")]
    ToolMissing { tool: String, hint: String },

    #[error("no snapshot path given (usage: etcd-restore <SNAPSHOT>)")]
    MissingSnapshot,

    #[error("snapshot not found: {}", .path.display())]
    SnapshotNotFound { path: PathBuf },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },

    #[error("snapshot restore failed after {attempts} attempts: {last_error}")]
    RestoreExhausted { attempts: u32, last_error: String },

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The three ways a run can fail, as reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    PrerequisiteMissing,
    InvalidInput,
    OperationFailed,
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::PrerequisiteMissing => "prerequisite missing",
            ErrorCategory::InvalidInput => "input invalid",
            ErrorCategory::OperationFailed => "operation failed",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ToolMissing { .. } => ErrorCategory::PrerequisiteMissing,
            Error::MissingSnapshot | Error::SnapshotNotFound { .. } | Error::Validation { .. } => {
                ErrorCategory::InvalidInput
            }
            _ => ErrorCategory::OperationFailed,
        }
    }
}

/// Extension trait to convert errors with Display to `Error::CommandFailed`.
pub trait CommandErrorExt<T> {
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}
