use std::path::PathBuf;

use thiserror::Error;

use workpack_core::{ApplyError, ConfigError, ProjectId, VersionToken};
use workpack_sync::SyncError;

/// Failure reported by a [`crate::RemoteStore`].
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("project {project} is locked by another process")]
    Busy { project: ProjectId },

    #[error("project {project} moved to version {current} since it was pulled")]
    Conflict {
        project: ProjectId,
        current: VersionToken,
    },

    #[error("project {project} does not exist")]
    NotFound { project: ProjectId },

    #[error("project {project} rejected the push: {source}")]
    Rejected {
        project: ProjectId,
        #[source]
        source: ApplyError,
    },

    #[error("project {project} unavailable: {reason}")]
    Unavailable { project: ProjectId, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemoteError {
    /// Whether a push that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Conflict { .. } | RemoteError::Unavailable { .. } | RemoteError::Io { .. }
        )
    }
}

/// Run-level failure: nothing about individual projects, the run itself
/// could not proceed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("base store error: {0}")]
    Sync(#[from] SyncError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{task} task join failure: {reason}")]
    Join { task: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.into(),
        source,
    }
}
