//! CLI error type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs `--path`.
    #[error("log directory required for {0} (use --path)")]
    PathRequired(&'static str),

    /// No log file at the expected location.
    #[error("no transaction log at {}", .0.display())]
    LogNotFound(PathBuf),

    /// The log directory does not exist.
    #[error("no log directory at {}", .0.display())]
    DirNotFound(PathBuf),

    /// The lock file exists but could not be opened.
    #[error("cannot open lock file {}: {source}", path.display())]
    LockFile {
        /// Lock file path.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// The log could not be read or decoded.
    #[error(transparent)]
    Core(#[from] concord_core::CoreError),

    /// The log file could not be opened.
    #[error(transparent)]
    Storage(#[from] concord_storage::StorageError),

    /// JSON output failed.
    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    /// `verify` found damaged records.
    #[error("verification failed: {0} problem(s) found")]
    VerificationFailed(usize),
}
