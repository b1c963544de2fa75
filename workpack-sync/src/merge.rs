//! Multi-way merge of the master's and the work packages' change sets.
//!
//! Filtering never rewrites primary keys, so every work-package change is
//! already addressed in the master's row-id space. Changes from all sources
//! are unioned per `(table, row id)`; when sources disagree on the outcome
//! of a row, the master wins, then the work package declared first.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use workpack_core::{ChangeSet, Dataset, RowChange, RowId, Table, TableName, WorkPackageName};

use crate::error::MergeError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a change came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Master,
    WorkPackage(WorkPackageName),
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSource::Master => write!(f, "master"),
            ChangeSource::WorkPackage(name) => write!(f, "work package {name}"),
        }
    }
}

/// What to do when sources disagree about a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Master first, then work packages in declaration order.
    #[default]
    MasterPrecedence,
    /// Fail the merge and list every conflict.
    Reject,
}

/// Divergent edits to one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub table: TableName,
    pub row: RowId,
    pub winner: ChangeSource,
    /// Sources whose differing outcome was discarded.
    pub overridden: Vec<ChangeSource>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let losers: Vec<String> = self.overridden.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} row {}: {} overrides {}",
            self.table,
            self.row,
            self.winner,
            losers.join(", ")
        )
    }
}

/// Result of one merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The new master dataset.
    pub master: Dataset,
    /// Changes that turn the master base into [`MergeOutcome::master`].
    pub consolidated: ChangeSet,
    pub conflicts: Vec<Conflict>,
    /// Number of winning changes per source, in precedence order.
    pub applied: Vec<(ChangeSource, usize)>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs the merge under a given [`ConflictPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine {
    policy: ConflictPolicy,
}

struct Candidate<'a> {
    source: usize,
    primary_key: &'a str,
    change: &'a RowChange,
}

impl MergeEngine {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Merge `master` and `work_packages` (in declaration order) on top of
    /// the master `base`.
    pub fn merge(
        &self,
        base: &Dataset,
        master: &ChangeSet,
        work_packages: &[(WorkPackageName, ChangeSet)],
    ) -> Result<MergeOutcome, MergeError> {
        let mut sources = vec![(ChangeSource::Master, master)];
        sources.extend(
            work_packages
                .iter()
                .map(|(name, cs)| (ChangeSource::WorkPackage(name.clone()), cs)),
        );

        let mut union: BTreeMap<(TableName, RowId), Vec<Candidate<'_>>> = BTreeMap::new();
        for (idx, (_, cs)) in sources.iter().enumerate() {
            for (table, changes) in cs.tables() {
                for (id, change) in changes.iter() {
                    union
                        .entry((table.clone(), id.clone()))
                        .or_default()
                        .push(Candidate {
                            source: idx,
                            primary_key: &changes.primary_key,
                            change,
                        });
                }
            }
        }

        let mut conflicts = Vec::new();
        let mut resolved: BTreeMap<TableName, (String, Vec<(RowId, usize, &RowChange)>)> =
            BTreeMap::new();
        for ((table, id), candidates) in union {
            // Candidates are pushed in source order, so the first one wins.
            let Some(winner) = candidates.first() else {
                continue;
            };
            let outcome = winner.change.outcome();
            let overridden: Vec<ChangeSource> = candidates
                .iter()
                .skip(1)
                .filter(|c| c.change.outcome() != outcome)
                .map(|c| sources[c.source].0.clone())
                .collect();
            if !overridden.is_empty() {
                conflicts.push(Conflict {
                    table: table.clone(),
                    row: id.clone(),
                    winner: sources[winner.source].0.clone(),
                    overridden,
                });
            }
            resolved
                .entry(table)
                .or_insert_with(|| (winner.primary_key.to_string(), Vec::new()))
                .1
                .push((id, winner.source, winner.change));
        }

        if !conflicts.is_empty() {
            if self.policy == ConflictPolicy::Reject {
                for conflict in &conflicts {
                    tracing::warn!("rejected conflict: {conflict}");
                }
                return Err(MergeError::Conflicts(conflicts));
            }
            for conflict in &conflicts {
                tracing::warn!("conflict resolved: {conflict}");
            }
        }

        let mut output = base.clone();
        let mut consolidated = ChangeSet::new();
        let mut applied = vec![0usize; sources.len()];

        for (table_name, (primary_key, rows)) in resolved {
            let idx = match output.tables.iter().position(|t| t.name == table_name) {
                Some(idx) => idx,
                None => {
                    output.tables.push(Table::new(table_name.clone(), primary_key.clone()));
                    output.tables.len() - 1
                }
            };
            let template = output.tables[idx].empty_like();
            let table = std::mem::replace(&mut output.tables[idx], template);
            let mut keyed = table.into_keyed().map_err(|source| MergeError::Base {
                table: table_name.clone(),
                source,
            })?;

            for (id, source, winning) in rows {
                let outcome = winning.outcome();
                let before = keyed.get(&id);
                if before.is_some()
                    && matches!(winning, RowChange::Insert { .. })
                    && source != 0
                {
                    tracing::debug!(
                        "{table_name} row {id}: insert from {} overwrites existing master row",
                        sources[source].0
                    );
                }
                let change = match (before, outcome) {
                    (None, Some(row)) => Some(RowChange::Insert { row: row.clone() }),
                    (Some(old), Some(new)) if old != new => Some(RowChange::Update {
                        old: old.clone(),
                        new: new.clone(),
                    }),
                    (Some(_), None) => Some(RowChange::Delete),
                    _ => None,
                };
                let Some(change) = change else {
                    continue;
                };
                applied[source] += 1;
                match outcome {
                    Some(row) => {
                        keyed.insert(id.clone(), row.clone());
                    }
                    None => {
                        keyed.remove(&id);
                    }
                }
                consolidated.record(&table_name, &primary_key, id, change);
            }
            output.tables[idx].rows = keyed.into_values().collect();
        }

        let applied = sources
            .into_iter()
            .map(|(source, _)| source)
            .zip(applied)
            .collect();

        Ok(MergeOutcome {
            master: output,
            consolidated,
            conflicts,
            applied,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use workpack_core::{Row, Value};

    use super::*;

    fn farm(fid: i64, name: &str) -> Row {
        Row::from([
            ("fid".to_string(), Value::Integer(fid)),
            ("name".to_string(), Value::from(name)),
        ])
    }

    fn base() -> Dataset {
        let mut farms = Table::new("farms", "fid");
        farms.rows = (1..=5).map(|i| farm(i, &format!("farm{i}"))).collect();
        Dataset::new(vec![farms])
    }

    fn cs(changes: Vec<(i64, RowChange)>) -> ChangeSet {
        let mut cs = ChangeSet::new();
        for (id, change) in changes {
            cs.record(&TableName::from("farms"), "fid", RowId::from(id), change);
        }
        cs
    }

    fn wp(name: &str, changes: Vec<(i64, RowChange)>) -> (WorkPackageName, ChangeSet) {
        (WorkPackageName::from(name), cs(changes))
    }

    fn rows(ds: &Dataset) -> &[Row] {
        &ds.table(&TableName::from("farms")).unwrap().rows
    }

    #[test]
    fn master_delete_beats_work_package_update() {
        let master = cs(vec![(5, RowChange::Delete)]);
        let team_a = wp(
            "TeamA",
            vec![(5, RowChange::Update { old: farm(5, "farm5"), new: farm(5, "X") })],
        );
        let out = MergeEngine::default().merge(&base(), &master, &[team_a]).unwrap();
        assert_eq!(rows(&out.master).len(), 4);
        assert!(rows(&out.master).iter().all(|r| r["fid"] != Value::Integer(5)));
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].winner, ChangeSource::Master);
        assert_eq!(
            out.conflicts[0].overridden,
            vec![ChangeSource::WorkPackage(WorkPackageName::from("TeamA"))]
        );
    }

    #[test]
    fn first_declared_work_package_wins() {
        let team_a = wp("TeamA", vec![(2, RowChange::Update { old: farm(2, "farm2"), new: farm(2, "A") })]);
        let team_b = wp("TeamB", vec![(2, RowChange::Update { old: farm(2, "farm2"), new: farm(2, "B") })]);
        let ab = MergeEngine::default()
            .merge(&base(), &ChangeSet::new(), &[team_a.clone(), team_b.clone()])
            .unwrap();
        let ba = MergeEngine::default()
            .merge(&base(), &ChangeSet::new(), &[team_b, team_a])
            .unwrap();
        assert_eq!(rows(&ab.master)[1], farm(2, "A"));
        assert_eq!(rows(&ba.master)[1], farm(2, "B"));
    }

    #[test]
    fn colliding_inserts_are_reported_as_a_conflict() {
        // Keys are shared with the master, so both packages picking the
        // next free fid land on the same row.
        let team_a = wp("TeamA", vec![(6, RowChange::Insert { row: farm(6, "from A") })]);
        let team_b = wp("TeamB", vec![(6, RowChange::Insert { row: farm(6, "from B") })]);
        let out = MergeEngine::default()
            .merge(&base(), &ChangeSet::new(), &[team_a, team_b])
            .unwrap();
        assert_eq!(rows(&out.master).len(), 6);
        assert_eq!(rows(&out.master)[5], farm(6, "from A"));
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].row, RowId::from(6));
        assert_eq!(
            out.conflicts[0].winner,
            ChangeSource::WorkPackage(WorkPackageName::from("TeamA"))
        );
        assert_eq!(
            out.conflicts[0].overridden,
            vec![ChangeSource::WorkPackage(WorkPackageName::from("TeamB"))]
        );
    }

    #[test]
    fn merge_is_deterministic() {
        let master = cs(vec![(1, RowChange::Update { old: farm(1, "farm1"), new: farm(1, "M") })]);
        let wps = vec![
            wp("TeamA", vec![(1, RowChange::Delete), (6, RowChange::Insert { row: farm(6, "new") })]),
            wp("TeamB", vec![(3, RowChange::Delete)]),
        ];
        let first = MergeEngine::default().merge(&base(), &master, &wps).unwrap();
        for _ in 0..10 {
            assert_eq!(MergeEngine::default().merge(&base(), &master, &wps).unwrap(), first);
        }
    }

    #[test]
    fn identical_outcomes_are_not_conflicts() {
        let team_a = wp("TeamA", vec![(4, RowChange::Delete)]);
        let team_b = wp("TeamB", vec![(4, RowChange::Delete)]);
        let out = MergeEngine::default()
            .merge(&base(), &ChangeSet::new(), &[team_a, team_b])
            .unwrap();
        assert!(out.conflicts.is_empty());
        assert_eq!(out.consolidated.summary().deleted, 1);
        assert_eq!(
            out.applied,
            vec![
                (ChangeSource::Master, 0),
                (ChangeSource::WorkPackage(WorkPackageName::from("TeamA")), 1),
                (ChangeSource::WorkPackage(WorkPackageName::from("TeamB")), 0),
            ]
        );
    }

    #[test]
    fn consolidated_changes_reproduce_output() {
        let master = cs(vec![(1, RowChange::Update { old: farm(1, "farm1"), new: farm(1, "M") })]);
        let wps = vec![wp(
            "TeamA",
            vec![(3, RowChange::Delete), (9, RowChange::Insert { row: farm(9, "nine") })],
        )];
        let out = MergeEngine::default().merge(&base(), &master, &wps).unwrap();
        assert_eq!(out.consolidated.apply(&base()).unwrap(), out.master);
    }

    #[test]
    fn untouched_rows_carry_over() {
        let out = MergeEngine::default()
            .merge(&base(), &ChangeSet::new(), &[])
            .unwrap();
        assert_eq!(out.master, base());
        assert!(out.consolidated.is_empty());
    }

    #[test]
    fn reject_policy_lists_every_conflict() {
        let master = cs(vec![(1, RowChange::Delete), (2, RowChange::Delete)]);
        let team_a = wp(
            "TeamA",
            vec![
                (1, RowChange::Update { old: farm(1, "farm1"), new: farm(1, "a") }),
                (2, RowChange::Update { old: farm(2, "farm2"), new: farm(2, "b") }),
            ],
        );
        let err = MergeEngine::new(ConflictPolicy::Reject)
            .merge(&base(), &master, &[team_a])
            .unwrap_err();
        match err {
            MergeError::Conflicts(conflicts) => assert_eq!(conflicts.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
