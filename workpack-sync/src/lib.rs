//! # workpack-sync
//!
//! Reconciliation engine: change extraction, partitioning, the multi-way
//! merge, the split back into work packages, and the base store.
//!
//! Everything here is synchronous and free of remote I/O; the
//! `workpack-runner` crate drives it across projects.

pub mod base_store;
pub mod diff;
pub mod error;
pub mod extract;
pub mod merge;
pub mod partition;
pub mod split;

pub use base_store::{BaseEntry, BaseManifest, BaseStore, BaseUpdate, ManifestEntry};
pub use diff::{DiffError, KeyedRowDiff, RowDiff, RowOp, TableDiff};
pub use error::{ExtractionError, MergeError, Side, SyncError};
pub use extract::ChangeExtractor;
pub use merge::{ChangeSource, Conflict, ConflictPolicy, MergeEngine, MergeOutcome};
pub use partition::{filter_table, partition};
pub use split::{split, SplitOutcome};
