use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XpanderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("input tap unavailable: {0}")]
    InputTapUnavailable(String),
    #[error("keyboard controller error: {0}")]
    Injection(String),
    #[error("clipboard unavailable: {0}")]
    ClipboardUnavailable(String),
    #[error("command failed: {0}")]
    CommandExecutionFailed(String),
    #[error("command timed out after {0} ms")]
    CommandTimedOut(u64),
    #[error("duplicate hotkey binding: {0}")]
    DuplicateHotkeyBinding(String),
    #[error("failed to load phrase {path}: {reason}")]
    PhraseLoad { path: PathBuf, reason: String },
    #[error("layout query failed: {0}")]
    LayoutQueryFailed(String),
    #[error("service is not running")]
    ServiceNotRunning,
    #[error("daemon already running with PID {0}")]
    DaemonAlreadyRunning(u32),
    #[error("daemon is not running")]
    DaemonNotRunning,
    #[error("invalid PID in daemon file")]
    InvalidPid,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, XpanderError>;
