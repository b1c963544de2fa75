//! Error types for workpack-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use workpack_core::{ApplyError, KeyError, RowId, TableName};

use crate::diff::DiffError;
use crate::merge::Conflict;

/// Which snapshot of a pair an extraction problem was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Base,
    Current,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Base => write!(f, "base"),
            Side::Current => write!(f, "current"),
        }
    }
}

/// Change extraction failed; the project is skipped for this run.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("table {table} ({side} snapshot): {source}")]
    Key {
        table: TableName,
        side: Side,
        #[source]
        source: KeyError,
    },

    #[error("table {table}: primary key is {base} in base but {current} in current")]
    PrimaryKeyMismatch {
        table: TableName,
        base: String,
        current: String,
    },

    #[error("row diff failed: {0}")]
    Diff(#[from] DiffError),

    #[error("table {table}: row diff reported unknown table")]
    UnknownTable { table: TableName },

    #[error("table {table}: row diff reported row {id} more than once")]
    DuplicateOperation { table: TableName, id: RowId },
}

/// The merge refused to resolve conflicting edits.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{} conflicting row edit(s) rejected", .0.len())]
    Conflicts(Vec<Conflict>),

    #[error("master base table {table}: {source}")]
    Base {
        table: TableName,
        #[source]
        source: KeyError,
    },
}

/// All errors that can arise from the reconciliation engine and base store.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (base store).
    #[error("base store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base snapshot {path} does not match its manifest checksum")]
    CorruptSnapshot { path: PathBuf },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
