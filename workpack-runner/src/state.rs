//! Per-project synchronization state owned by the orchestrator.

use std::fmt;

use serde::Serialize;

use workpack_core::{ChangeSummary, ProjectId, VersionToken, WorkPackageName, MASTER_KEY};

use crate::remote::LockHandle;

/// Lifecycle of one project within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Locking,
    Pulling,
    Extracting,
    Merged,
    Splitting,
    Pushing,
    Done,
    Failed,
}

impl Phase {
    fn next(self) -> Option<Phase> {
        match self {
            Phase::Pending => Some(Phase::Locking),
            Phase::Locking => Some(Phase::Pulling),
            Phase::Pulling => Some(Phase::Extracting),
            Phase::Extracting => Some(Phase::Merged),
            Phase::Merged => Some(Phase::Splitting),
            Phase::Splitting => Some(Phase::Pushing),
            Phase::Pushing => Some(Phase::Done),
            Phase::Done | Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "pending",
            Phase::Locking => "locking",
            Phase::Pulling => "pulling",
            Phase::Extracting => "extracting",
            Phase::Merged => "merged",
            Phase::Splitting => "splitting",
            Phase::Pushing => "pushing",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The master project or one work package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Master,
    WorkPackage(WorkPackageName),
}

impl ProjectRole {
    /// File-system-safe key used by the base store.
    pub fn key(&self) -> String {
        match self {
            ProjectRole::Master => MASTER_KEY.to_string(),
            ProjectRole::WorkPackage(name) => name.0.clone(),
        }
    }
}

/// How a project's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProjectStatus {
    Synced,
    SkippedLocked,
    /// Not attempted because of another project, e.g. a locked master.
    Skipped { reason: String },
    Failed { phase: Phase, reason: String },
}

/// Mutable state of one project during a run.
#[derive(Debug, Clone)]
pub struct ProjectSyncState {
    pub role: ProjectRole,
    pub project: ProjectId,
    phase: Phase,
    status: Option<ProjectStatus>,
    /// Held lock, released at the end of the run.
    pub lock: Option<LockHandle>,
    pub pulled_version: Option<VersionToken>,
    pub pushed_version: Option<VersionToken>,
    pub push_attempts: u32,
    /// Changes this project made since its base.
    pub local_changes: ChangeSummary,
    /// Changes sent (or, in a dry run, to be sent) to this project.
    pub pushed_changes: ChangeSummary,
}

impl ProjectSyncState {
    pub fn new(role: ProjectRole, project: ProjectId) -> Self {
        Self {
            role,
            project,
            phase: Phase::Pending,
            status: None,
            lock: None,
            pulled_version: None,
            pushed_version: None,
            push_attempts: 0,
            local_changes: ChangeSummary::default(),
            pushed_changes: ChangeSummary::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> Option<&ProjectStatus> {
        self.status.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// Move forward through the lifecycle up to `target`.
    ///
    /// Terminal states are absorbing; moving backwards is ignored.
    pub fn advance_to(&mut self, target: Phase) {
        if target == Phase::Failed {
            return;
        }
        while self.phase < target {
            let Some(next) = self.phase.next() else {
                return;
            };
            tracing::debug!(project = %self.project, from = %self.phase, to = %next, "phase");
            self.phase = next;
        }
        if self.phase == Phase::Done {
            self.status = Some(ProjectStatus::Synced);
        }
    }

    /// Fail the project in its current phase. No-op once terminal.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        let reason = reason.into();
        tracing::warn!(project = %self.project, phase = %self.phase, reason = %reason, "project failed");
        self.status = Some(ProjectStatus::Failed {
            phase: self.phase,
            reason,
        });
        self.phase = Phase::Failed;
    }

    /// Lock was busy: failed for this run, reported as skipped.
    pub fn skip_locked(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        tracing::info!(project = %self.project, "project locked elsewhere, skipped");
        self.status = Some(ProjectStatus::SkippedLocked);
        self.phase = Phase::Failed;
    }

    /// Stop without counting as a failure.
    pub fn skip(&mut self, reason: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        let reason = reason.into();
        tracing::info!(project = %self.project, reason = %reason, "project skipped");
        self.status = Some(ProjectStatus::Skipped { reason });
        self.phase = Phase::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProjectSyncState {
        ProjectSyncState::new(
            ProjectRole::WorkPackage(WorkPackageName::from("TeamA")),
            ProjectId::from("org/a"),
        )
    }

    #[test]
    fn advances_in_order_to_done() {
        let mut s = state();
        s.advance_to(Phase::Extracting);
        assert_eq!(s.phase(), Phase::Extracting);
        s.advance_to(Phase::Done);
        assert_eq!(s.status(), Some(&ProjectStatus::Synced));
    }

    #[test]
    fn failed_is_absorbing() {
        let mut s = state();
        s.advance_to(Phase::Pulling);
        s.fail("network down");
        s.advance_to(Phase::Done);
        s.skip_locked();
        assert_eq!(s.phase(), Phase::Failed);
        assert_eq!(
            s.status(),
            Some(&ProjectStatus::Failed { phase: Phase::Pulling, reason: "network down".into() })
        );
    }

    #[test]
    fn skip_keeps_reason_and_is_absorbing() {
        let mut s = state();
        s.advance_to(Phase::Extracting);
        s.skip("master locked elsewhere");
        s.fail("late failure");
        assert_eq!(
            s.status(),
            Some(&ProjectStatus::Skipped { reason: "master locked elsewhere".into() })
        );
    }

    #[test]
    fn never_moves_backwards() {
        let mut s = state();
        s.advance_to(Phase::Merged);
        s.advance_to(Phase::Locking);
        assert_eq!(s.phase(), Phase::Merged);
    }

    #[test]
    fn master_key_is_reserved_name() {
        assert_eq!(ProjectRole::Master.key(), "master");
        assert_eq!(ProjectRole::WorkPackage(WorkPackageName::from("TeamA")).key(), "TeamA");
    }
}
