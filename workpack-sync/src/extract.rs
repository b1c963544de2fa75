//! Change extraction: `Base → current` as a canonical [`ChangeSet`].
//!
//! The row comparison itself is delegated to a [`RowDiff`]; this module
//! validates keys on both sides, aligns tables by name and folds whatever
//! the diff reports into one change per row id.

use std::collections::BTreeMap;

use workpack_core::types::key_of;
use workpack_core::{ChangeSet, Dataset, Row, RowChange, RowId, Table, TableChanges};

use crate::diff::{KeyedRowDiff, RowDiff, RowOp};
use crate::error::{ExtractionError, Side};

/// Computes change sets between two snapshots of a dataset.
#[derive(Debug, Clone, Default)]
pub struct ChangeExtractor<D = KeyedRowDiff> {
    differ: D,
}

impl ChangeExtractor<KeyedRowDiff> {
    /// An extractor backed by the in-memory [`KeyedRowDiff`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: RowDiff> ChangeExtractor<D> {
    pub fn with_differ(differ: D) -> Self {
        Self { differ }
    }

    /// Row-level changes that turn `base` into `current`.
    ///
    /// A table present on one side only is reported as all inserts or all
    /// deletes. Fails when a primary key is missing, invalid or repeated on
    /// either side, or when the two sides disagree on a table's key column.
    pub fn extract(&self, base: &Dataset, current: &Dataset) -> Result<ChangeSet, ExtractionError> {
        let mut shared_base = Vec::new();
        let mut shared_current = Vec::new();
        let mut changes = ChangeSet::new();

        for table in &base.tables {
            check_keys(table, Side::Base)?;
            match current.table(&table.name) {
                Some(other) => {
                    if other.primary_key != table.primary_key {
                        return Err(ExtractionError::PrimaryKeyMismatch {
                            table: table.name.clone(),
                            base: table.primary_key.clone(),
                            current: other.primary_key.clone(),
                        });
                    }
                    shared_base.push(table.clone());
                    shared_current.push(other.clone());
                }
                None => {
                    tracing::warn!(
                        "table {} missing from current snapshot; {} row(s) reported deleted",
                        table.name,
                        table.rows.len()
                    );
                    changes.insert_table(table.name.clone(), one_sided(table, Side::Base)?);
                }
            }
        }

        for table in &current.tables {
            check_keys(table, Side::Current)?;
            if base.table(&table.name).is_none() {
                tracing::warn!(
                    "table {} missing from base snapshot; {} row(s) reported inserted",
                    table.name,
                    table.rows.len()
                );
                changes.insert_table(table.name.clone(), one_sided(table, Side::Current)?);
            }
        }

        if shared_base.is_empty() {
            return Ok(changes);
        }

        let diffs = self
            .differ
            .diff(&Dataset::new(shared_base), &Dataset::new(shared_current))?;

        for diff in diffs {
            let shared = base
                .table(&diff.table)
                .filter(|_| current.table(&diff.table).is_some());
            let Some(table) = shared else {
                return Err(ExtractionError::UnknownTable { table: diff.table });
            };
            let mut pending: BTreeMap<RowId, RowOp> = BTreeMap::new();
            for op in diff.ops {
                match op {
                    RowOp::Update { old, new } => {
                        let old_id = op_key(table, &old)?;
                        let new_id = op_key(table, &new)?;
                        if old_id == new_id {
                            fold(&mut pending, table, old_id, RowOp::Update { old, new })?;
                        } else {
                            fold(&mut pending, table, old_id, RowOp::Delete { row: old })?;
                            fold(&mut pending, table, new_id, RowOp::Insert { row: new })?;
                        }
                    }
                    RowOp::Insert { row } => {
                        let id = op_key(table, &row)?;
                        fold(&mut pending, table, id, RowOp::Insert { row })?;
                    }
                    RowOp::Delete { row } => {
                        let id = op_key(table, &row)?;
                        fold(&mut pending, table, id, RowOp::Delete { row })?;
                    }
                }
            }

            let mut table_changes = TableChanges::new(table.primary_key.clone());
            for (id, op) in pending {
                let change = match op {
                    RowOp::Insert { row } => RowChange::Insert { row },
                    RowOp::Update { old, new } if old == new => continue,
                    RowOp::Update { old, new } => RowChange::Update { old, new },
                    RowOp::Delete { .. } => RowChange::Delete,
                };
                table_changes.record(id, change);
            }
            changes.insert_table(diff.table, table_changes);
        }

        Ok(changes)
    }
}

fn check_keys(table: &Table, side: Side) -> Result<(), ExtractionError> {
    table
        .keyed()
        .map(|_| ())
        .map_err(|source| ExtractionError::Key {
            table: table.name.clone(),
            side,
            source,
        })
}

fn op_key(table: &Table, row: &Row) -> Result<RowId, ExtractionError> {
    key_of(row, &table.primary_key).map_err(|source| ExtractionError::Key {
        table: table.name.clone(),
        side: Side::Current,
        source,
    })
}

/// Every row of a table known to one side only.
fn one_sided(table: &Table, side: Side) -> Result<TableChanges, ExtractionError> {
    let mut changes = TableChanges::new(table.primary_key.clone());
    for row in &table.rows {
        let id = table.row_id(row).map_err(|source| ExtractionError::Key {
            table: table.name.clone(),
            side,
            source,
        })?;
        let change = match side {
            Side::Base => RowChange::Delete,
            Side::Current => RowChange::Insert { row: row.clone() },
        };
        changes.record(id, change);
    }
    Ok(changes)
}

/// Merge `op` into the pending operation for `id`.
///
/// A delete and an insert of the same id in either order become an update,
/// or nothing when the row content is unchanged. Any other repeat is an error.
fn fold(
    pending: &mut BTreeMap<RowId, RowOp>,
    table: &Table,
    id: RowId,
    op: RowOp,
) -> Result<(), ExtractionError> {
    let Some(previous) = pending.remove(&id) else {
        pending.insert(id, op);
        return Ok(());
    };
    let (old, new) = match (previous, op) {
        (RowOp::Delete { row: old }, RowOp::Insert { row: new })
        | (RowOp::Insert { row: new }, RowOp::Delete { row: old }) => (old, new),
        _ => {
            return Err(ExtractionError::DuplicateOperation {
                table: table.name.clone(),
                id,
            })
        }
    };
    if old != new {
        pending.insert(id, RowOp::Update { old, new });
    }
    Ok(())
}
