//! Row-level change sets between two states of a dataset.
//!
//! Every row id maps to exactly one [`RowChange`], so the inserted, updated
//! and deleted sets of a table are disjoint by construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ApplyError;
use crate::types::{Dataset, Row, RowId, Table, TableName};

/// What happened to a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RowChange {
    Insert { row: Row },
    Update { old: Row, new: Row },
    Delete,
}

impl RowChange {
    /// Row content after the change, `None` when the row is gone.
    pub fn outcome(&self) -> Option<&Row> {
        match self {
            RowChange::Insert { row } => Some(row),
            RowChange::Update { new, .. } => Some(new),
            RowChange::Delete => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RowChange::Insert { .. } => "insert",
            RowChange::Update { .. } => "update",
            RowChange::Delete => "delete",
        }
    }
}

/// Changes to one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    pub primary_key: String,
    #[serde(with = "entries")]
    changes: BTreeMap<RowId, RowChange>,
}

impl TableChanges {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            changes: BTreeMap::new(),
        }
    }

    /// Record `change` for `id`, returning the change it replaced.
    pub fn record(&mut self, id: RowId, change: RowChange) -> Option<RowChange> {
        self.changes.insert(id, change)
    }

    pub fn get(&self, id: &RowId) -> Option<&RowChange> {
        self.changes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &RowChange)> {
        self.changes.iter()
    }

    pub fn inserted(&self) -> impl Iterator<Item = (&RowId, &Row)> {
        self.changes.iter().filter_map(|(id, c)| match c {
            RowChange::Insert { row } => Some((id, row)),
            _ => None,
        })
    }

    pub fn updated(&self) -> impl Iterator<Item = (&RowId, &Row, &Row)> {
        self.changes.iter().filter_map(|(id, c)| match c {
            RowChange::Update { old, new } => Some((id, old, new)),
            _ => None,
        })
    }

    pub fn deleted(&self) -> impl Iterator<Item = &RowId> {
        self.changes
            .iter()
            .filter_map(|(id, c)| matches!(c, RowChange::Delete).then_some(id))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Insert / update / delete counts of a change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ChangeSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Per-table row changes between two snapshots of a dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    tables: BTreeMap<TableName, TableChanges>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change, creating the table entry on first use.
    pub fn record(
        &mut self,
        table: &TableName,
        primary_key: &str,
        id: RowId,
        change: RowChange,
    ) -> Option<RowChange> {
        self.tables
            .entry(table.clone())
            .or_insert_with(|| TableChanges::new(primary_key))
            .record(id, change)
    }

    /// Attach a whole table's changes. Empty tables are not kept.
    pub fn insert_table(&mut self, table: TableName, changes: TableChanges) {
        if !changes.is_empty() {
            self.tables.insert(table, changes);
        }
    }

    pub fn table(&self, name: &TableName) -> Option<&TableChanges> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&TableName, &TableChanges)> {
        self.tables.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableChanges::is_empty)
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for changes in self.tables.values() {
            for (_, change) in changes.iter() {
                match change {
                    RowChange::Insert { .. } => summary.inserted += 1,
                    RowChange::Update { .. } => summary.updated += 1,
                    RowChange::Delete => summary.deleted += 1,
                }
            }
        }
        summary
    }

    /// Apply the change set to `dataset`, strictly.
    ///
    /// Inserting an existing row, or updating/deleting a missing one, is an
    /// error. Rows of touched tables come out ordered by row id; tables only
    /// known to the change set are created.
    pub fn apply(&self, dataset: &Dataset) -> Result<Dataset, ApplyError> {
        let mut out = dataset.clone();
        for (name, changes) in &self.tables {
            let idx = match out.tables.iter().position(|t| &t.name == name) {
                Some(idx) => idx,
                None => {
                    out.tables
                        .push(Table::new(name.clone(), changes.primary_key.clone()));
                    out.tables.len() - 1
                }
            };
            let table = &mut out.tables[idx];
            let template = table.empty_like();
            let mut rows = std::mem::replace(table, template)
                .into_keyed()
                .map_err(|source| ApplyError::Key {
                    table: name.clone(),
                    source,
                })?;

            for (id, change) in changes.iter() {
                match change {
                    RowChange::Insert { row } => {
                        if rows.insert(id.clone(), row.clone()).is_some() {
                            return Err(ApplyError::RowExists {
                                table: name.clone(),
                                id: id.clone(),
                            });
                        }
                    }
                    RowChange::Update { new, .. } => match rows.get_mut(id) {
                        Some(slot) => *slot = new.clone(),
                        None => {
                            return Err(ApplyError::RowMissing {
                                table: name.clone(),
                                id: id.clone(),
                            })
                        }
                    },
                    RowChange::Delete => {
                        if rows.remove(id).is_none() {
                            return Err(ApplyError::RowMissing {
                                table: name.clone(),
                                id: id.clone(),
                            });
                        }
                    }
                }
            }
            out.tables[idx].rows = rows.into_values().collect();
        }
        Ok(out)
    }
}

/// Serializes a row-id keyed map as a list of `[id, value]` pairs so that
/// integer and text ids survive a JSON round trip unchanged.
mod entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::types::RowId;

    pub fn serialize<S, V>(map: &BTreeMap<RowId, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<RowId, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let pairs: Vec<(RowId, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
