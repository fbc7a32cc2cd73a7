// src/error.rs

use crate::cleanup::CleanupReport;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Confik
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The staging lock could not be opened or acquired
    #[error("failed to acquire lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be copied into the project root
    #[error("failed to stage {}: {source}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest could not be written
    #[error("failed to write manifest {}: {source}", path.display())]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest exists but cannot be trusted to drive cleanup
    #[error("failed to read manifest {} ({reason})", path.display())]
    CorruptManifest { path: PathBuf, reason: String },

    /// The editor settings document could not be written or removed
    #[error("failed to update {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `.git` exists but does not point at a git directory
    #[error("unable to resolve git directory from {}", .0.display())]
    GitDir(PathBuf),

    /// The guarded command could not be started
    #[error("failed to run {command} ({source})")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Signal handlers could not be installed
    #[error("failed to install signal handlers: {0}")]
    Signal(std::io::Error),

    /// Some staged artifacts could not be reversed
    #[error("cleanup incomplete ({0})")]
    CleanupIncomplete(CleanupReport),
}

/// Result type alias using Confik's Error type
pub type Result<T> = std::result::Result<T, Error>;
