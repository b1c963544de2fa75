//! Error types for workpack-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ProjectId, RowId, TableName, WorkPackageName};

/// Errors raised while loading or validating the work-package configuration.
///
/// Any of these aborts the whole run before a remote project is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, with file path and serde_yaml's line context.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration does not name a dataset file")]
    MissingDatasetFile,

    #[error("work package name {name:?} is invalid: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("project id {project:?} is invalid: {reason}")]
    InvalidProject {
        project: String,
        reason: &'static str,
    },

    #[error("work package {0} is declared more than once")]
    DuplicateWorkPackage(WorkPackageName),

    #[error("project {project} is used by more than one work package")]
    DuplicateProject { project: ProjectId },

    #[error("work package {work_package} targets the master project {project}")]
    MasterAsWorkPackage {
        work_package: WorkPackageName,
        project: ProjectId,
    },

    #[error("table {0} is listed more than once")]
    DuplicateTable(TableName),

    #[error("table {table} uses filter-column but has no filter-column-name")]
    MissingFilterColumn { table: TableName },

    #[error("work package {work_package} has an invalid boundary: {reason}")]
    InvalidBoundary {
        work_package: WorkPackageName,
        reason: String,
    },

    #[error("work package {work_package} has an invalid filter value for table {table}: {reason}")]
    InvalidFilterValue {
        work_package: WorkPackageName,
        table: TableName,
        reason: String,
    },
}

/// Primary-key problems found while keying a table's rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("row without a value in primary-key column {column}")]
    Missing { column: String },

    #[error("primary-key column {column} holds unusable value {value}")]
    Invalid { column: String, value: String },

    #[error("primary-key value {id} appears more than once in column {column}")]
    Duplicate { column: String, id: RowId },
}

/// Errors raised while applying a change set to a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("table {table}: {source}")]
    Key {
        table: TableName,
        #[source]
        source: KeyError,
    },

    #[error("table {table}: cannot insert row {id}, it already exists")]
    RowExists { table: TableName, id: RowId },

    #[error("table {table}: row {id} does not exist")]
    RowMissing { table: TableName, id: RowId },
}
