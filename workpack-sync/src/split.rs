//! Splitting the new master back into per-work-package pushes.

use workpack_core::{ChangeSet, Dataset, WorkPackage, WorkPackageName};

use crate::diff::RowDiff;
use crate::error::ExtractionError;
use crate::extract::ChangeExtractor;
use crate::partition::partition;

/// What one work package should receive.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub work_package: WorkPackageName,
    /// The work package's view of the new master.
    pub output: Dataset,
    /// Changes that turn the current remote state into [`SplitOutcome::output`].
    pub push: ChangeSet,
}

/// Compute the push for `work_package`.
///
/// `input` is the state pulled from the work package's project this run;
/// `None` for a work package without data yet, whose push is then all
/// inserts.
pub fn split<D: RowDiff>(
    extractor: &ChangeExtractor<D>,
    master_output: &Dataset,
    work_package: &WorkPackage,
    input: Option<&Dataset>,
) -> Result<SplitOutcome, ExtractionError> {
    let output = partition(master_output, work_package);
    let push = match input {
        Some(input) => extractor.extract(input, &output)?,
        None => extractor.extract(&output.empty_like(), &output)?,
    };
    tracing::debug!(
        "split {}: {} row(s) in view, {} change(s) to push",
        work_package.name,
        output.row_count(),
        push.summary().total()
    );
    Ok(SplitOutcome {
        work_package: work_package.name.clone(),
        output,
        push,
    })
}
