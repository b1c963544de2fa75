//! workpack core library: data model, filter rules, configuration, errors.
//!
//! - [`types`]: datasets, rows, snapshots and newtypes
//! - [`changeset`]: row-level change sets and strict application
//! - [`rule`]: column-equality and geometry-intersection filter rules
//! - [`config`]: YAML configuration loading and validation
//! - [`error`]: [`ConfigError`], [`KeyError`], [`ApplyError`]

pub mod changeset;
pub mod config;
pub mod error;
pub mod rule;
pub mod types;

pub use changeset::{ChangeSet, ChangeSummary, RowChange, TableChanges};
pub use config::{Config, FilterMethod, FilteredTable, WorkPackage, MASTER_KEY};
pub use error::{ApplyError, ConfigError, KeyError};
pub use rule::{FilterRule, FilterValue, ScalarValue};
pub use types::{
    Dataset, ProjectId, Row, RowId, RunId, Snapshot, SnapshotKind, Table, TableName, Value,
    VersionToken, WorkPackageName,
};
