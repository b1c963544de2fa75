//! Partitioning a dataset into a work package's view.

use workpack_core::{Dataset, FilterRule, Table, WorkPackage};

/// The subset of `dataset` that belongs to `work_package`.
///
/// Filtered tables keep only the rows matching the work package's rule;
/// every other table is copied in full. Row order is preserved.
pub fn partition(dataset: &Dataset, work_package: &WorkPackage) -> Dataset {
    Dataset::new(
        dataset
            .tables
            .iter()
            .map(|table| match work_package.rule_for(&table.name) {
                Some(rule) => filter_table(table, rule),
                None => table.clone(),
            })
            .collect(),
    )
}

/// Rows of `table` for which `rule` holds.
pub fn filter_table(table: &Table, rule: &FilterRule) -> Table {
    let mut out = table.empty_like();
    out.rows = table
        .rows
        .iter()
        .filter(|row| rule.belongs_to(row))
        .cloned()
        .collect();
    out
}
