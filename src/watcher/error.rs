//! Error types for the change watcher.

use std::path::PathBuf;
use thiserror::Error;

use super::WatcherState;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Watcher is {actual}, expected {expected}")]
    InvalidState {
        expected: WatcherState,
        actual: WatcherState,
    },

    #[error("Watcher must be started from within a Tokio runtime")]
    NoRuntime,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
