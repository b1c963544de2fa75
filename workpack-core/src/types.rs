//! Domain types for datasets, rows and snapshots.
//!
//! A [`Dataset`] is an ordered list of [`Table`]s. Rows are column → [`Value`]
//! maps; a row is identified inside its table by the value of the table's
//! primary-key column, converted to a [`RowId`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a table inside a dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName(pub String);

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TableName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TableName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// User-defined name of a work package (e.g. `TeamA`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkPackageName(pub String);

impl fmt::Display for WorkPackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for WorkPackageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkPackageName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a project in the remote store (e.g. `org/survey-team-a`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of one synchronization run. Sorts chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// A run id derived from the given start time, e.g. `20240131T120501.123Z`.
    pub fn at(started_at: DateTime<Utc>) -> Self {
        Self(started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque version of a remote project, as returned by pull and push.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub String);

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for VersionToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Values and rows
// ---------------------------------------------------------------------------

/// A typed cell value.
///
/// Geometries are carried as WKT literals and parsed only when a geometry
/// filter is evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Geometry(String),
}

impl Value {
    /// The row id this value represents when used as a primary key.
    pub fn as_row_id(&self) -> Option<RowId> {
        match self {
            Value::Integer(i) => Some(RowId::Int(*i)),
            Value::Text(s) => Some(RowId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Geometry(wkt) => write!(f, "{wkt}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// A row: column name → value.
pub type Row = BTreeMap<String, Value>;

/// Primary-key value of a row. Integers sort before text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(i) => write!(f, "{i}"),
            RowId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RowId {
    fn from(i: i64) -> Self {
        RowId::Int(i)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId::Text(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tables and datasets
// ---------------------------------------------------------------------------

/// A named table with a declared primary-key column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: TableName,
    pub primary_key: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<TableName>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            rows: Vec::new(),
        }
    }

    /// Same name and primary key, no rows.
    pub fn empty_like(&self) -> Self {
        Self::new(self.name.clone(), self.primary_key.clone())
    }

    /// Row id of a single row, validated against this table's primary key.
    pub fn row_id(&self, row: &Row) -> Result<RowId, KeyError> {
        key_of(row, &self.primary_key)
    }

    /// Rows keyed by primary key. Fails on a missing, invalid or repeated key.
    pub fn keyed(&self) -> Result<BTreeMap<RowId, &Row>, KeyError> {
        let mut keyed = BTreeMap::new();
        for row in &self.rows {
            let id = self.row_id(row)?;
            if keyed.insert(id.clone(), row).is_some() {
                return Err(KeyError::Duplicate {
                    column: self.primary_key.clone(),
                    id,
                });
            }
        }
        Ok(keyed)
    }

    /// Owned variant of [`Table::keyed`].
    pub fn into_keyed(self) -> Result<BTreeMap<RowId, Row>, KeyError> {
        let mut keyed = BTreeMap::new();
        for row in self.rows {
            let id = key_of(&row, &self.primary_key)?;
            if keyed.contains_key(&id) {
                return Err(KeyError::Duplicate {
                    column: self.primary_key,
                    id,
                });
            }
            keyed.insert(id, row);
        }
        Ok(keyed)
    }
}

/// Row id of `row` under primary-key column `primary_key`.
pub fn key_of(row: &Row, primary_key: &str) -> Result<RowId, KeyError> {
    match row.get(primary_key) {
        None | Some(Value::Null) => Err(KeyError::Missing {
            column: primary_key.to_string(),
        }),
        Some(value) => value.as_row_id().ok_or_else(|| KeyError::Invalid {
            column: primary_key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// An ordered set of named tables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Dataset {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    pub fn table(&self, name: &TableName) -> Option<&Table> {
        self.tables.iter().find(|t| &t.name == name)
    }

    /// Same tables, no rows.
    pub fn empty_like(&self) -> Self {
        Self {
            tables: self.tables.iter().map(Table::empty_like).collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Which of the three per-run states a snapshot captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Synchronized state left by the previous run.
    Base,
    /// Current remote state, pulled at the start of the run.
    Input,
    /// State computed by this run and pushed.
    Output,
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKind::Base => write!(f, "base"),
            SnapshotKind::Input => write!(f, "input"),
            SnapshotKind::Output => write!(f, "output"),
        }
    }
}

/// A dataset captured at a point in time by a given run for a given project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub project: ProjectId,
    pub run_id: RunId,
    pub kind: SnapshotKind,
    pub taken_at: DateTime<Utc>,
    pub dataset: Dataset,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
