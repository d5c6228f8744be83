//! Error types for worker-runner

use std::path::PathBuf;
use thiserror::Error;

use crate::process::ExitInfo;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors that can occur while preparing or supervising a worker
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Malformed start request
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    /// A live process already exists for this worker
    #[error("Worker {worker_id} is already running")]
    AlreadyRunning { worker_id: String },

    /// No live process exists for this worker
    #[error("Worker {worker_id} is not running")]
    NotRunning { worker_id: String },

    /// The source directory has no runnable file
    #[error("No entry point found in {path}")]
    NoEntryPoint { path: PathBuf },

    /// The process exited inside the health-check window
    #[error("Worker {worker_id} crashed on start ({exit})\n{log_tail}")]
    CrashedOnStart {
        worker_id: String,
        exit: ExitInfo,
        log_tail: String,
    },

    /// Failed to spawn the worker process
    #[error("Failed to spawn worker process: {message}")]
    SpawnFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Worker record not present in the metadata store
    #[error("Worker not found: {worker_id}")]
    WorkerNotFound { worker_id: String },

    /// Metadata store error
    #[error("Store error: {0}")]
    Store(#[from] bh_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Create a Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a SpawnFailed error with source
    pub fn spawn_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: Some(source),
        }
    }
}
