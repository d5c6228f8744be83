//! Error types for dependency resolution

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors that can occur while resolving or installing dependencies
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A source file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Source directory does not exist
    #[error("Source directory not found: {path}")]
    SourceDirNotFound { path: PathBuf },

    /// Package manager could not be launched
    #[error("Installer command failed: {message}")]
    InstallerFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Package manager ran past its deadline
    #[error("Installer timed out after {seconds} seconds")]
    InstallerTimeout { seconds: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    /// Create an InstallerFailed error
    pub fn installer_failed(message: impl Into<String>) -> Self {
        Self::InstallerFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an InstallerFailed error with source
    pub fn installer_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::InstallerFailed {
            message: message.into(),
            source: Some(source),
        }
    }
}
