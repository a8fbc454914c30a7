//! Error types for the state layer
//!
//! Errors here never cross a container operation. They surface only from
//! construction-time helpers (config loading, storage setup) and from the
//! storage port itself, whose write-back failures the containers log and drop.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by storage and configuration plumbing
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not find home directory")]
    HomeDirNotFound,

    #[error("Persisted snapshot for '{name}' has unsupported version {version}")]
    UnsupportedVersion { name: String, version: u32 },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the failure came from the filesystem rather than from
    /// the content being read or written.
    pub fn is_io(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::HomeDirNotFound)
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            StoreError::Io { .. } => "Check file permissions and disk space.",
            StoreError::Json(_) => "The stored state is corrupt. It will be reset on next write.",
            StoreError::Config(_) => "Check your configuration in ~/.dashboard/config.json",
            StoreError::HomeDirNotFound => "Set DASHBOARD_STATE_DIR to a writable directory.",
            StoreError::UnsupportedVersion { .. } => {
                "The stored state was written by a newer version and will be ignored."
            }
        }
    }
}
