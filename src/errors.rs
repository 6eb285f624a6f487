//! Error types for installer operations

use std::io;
use thiserror::Error;

/// Result type for installer operations
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Errors produced while running a command or managing a daemon.
///
/// Every string field is already squashed onto a single line, so the
/// rendered message is always safe to log as one record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    #[error("command {program} {args:?} timed out after {seconds} seconds")]
    Timeout {
        program: String,
        args: Vec<String>,
        seconds: u64,
    },

    #[error("command {program} exited with status {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to get {stream} pipe of {program}")]
    Pipe {
        program: String,
        stream: &'static str,
    },

    #[error("failed to wait daemon {program}: {reason}")]
    Wait { program: String, reason: String },

    #[error("failed to stop daemon {program}: {reason}")]
    Kill { program: String, reason: String },

    #[error("failed to close {stream} pipe of {program}: {reason}")]
    Close {
        program: String,
        stream: &'static str,
        reason: String,
    },
}

/// Errors that can occur during an installation run
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to determine host identity: {0}")]
    HostIdentity(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Failed to copy {path}: {source}")]
    Copy {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to persist autoloader: {0}")]
    Persistence(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
