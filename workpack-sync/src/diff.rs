//! Row-diff port.
//!
//! The row-level comparison of two same-schema datasets is an external
//! capability; [`RowDiff`] is its seam. [`KeyedRowDiff`] is the bundled
//! in-memory implementation, keyed by each table's primary key.

use thiserror::Error;

use workpack_core::{Dataset, Row, TableName};

/// One row-level operation reported by a [`RowDiff`].
#[derive(Debug, Clone, PartialEq)]
pub enum RowOp {
    Insert { row: Row },
    Update { old: Row, new: Row },
    Delete { row: Row },
}

/// Operations for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDiff {
    pub table: TableName,
    pub primary_key: String,
    pub ops: Vec<RowOp>,
}

/// The diff capability could not compare the datasets.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DiffError(pub String);

/// Port: row-level diff between two datasets with the same tables.
pub trait RowDiff: Send + Sync {
    fn diff(&self, from: &Dataset, to: &Dataset) -> Result<Vec<TableDiff>, DiffError>;
}

/// Compares rows by primary key: present only in `to` is an insert, only in
/// `from` a delete, in both with different content an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedRowDiff;

impl RowDiff for KeyedRowDiff {
    fn diff(&self, from: &Dataset, to: &Dataset) -> Result<Vec<TableDiff>, DiffError> {
        let mut diffs = Vec::with_capacity(from.tables.len());
        for old_table in &from.tables {
            let new_table = to.table(&old_table.name).ok_or_else(|| {
                DiffError(format!("table {} missing from target", old_table.name))
            })?;
            let old_rows = old_table
                .keyed()
                .map_err(|e| DiffError(format!("table {}: {e}", old_table.name)))?;
            let new_rows = new_table
                .keyed()
                .map_err(|e| DiffError(format!("table {}: {e}", new_table.name)))?;

            let mut ops = Vec::new();
            for (id, old) in &old_rows {
                match new_rows.get(id) {
                    None => ops.push(RowOp::Delete { row: (*old).clone() }),
                    Some(new) if new != old => ops.push(RowOp::Update {
                        old: (*old).clone(),
                        new: (*new).clone(),
                    }),
                    Some(_) => {}
                }
            }
            for (id, new) in &new_rows {
                if !old_rows.contains_key(id) {
                    ops.push(RowOp::Insert { row: (*new).clone() });
                }
            }

            diffs.push(TableDiff {
                table: old_table.name.clone(),
                primary_key: old_table.primary_key.clone(),
                ops,
            });
        }
        Ok(diffs)
    }
}
