//! Sync orchestrator.
//!
//! One run takes every project through
//! `lock → pull → extract → merge → split → push`:
//!
//! 1. **Prepare** (fan-out): each project is locked, pulled and diffed
//!    against its base on a bounded pool of tasks. Results travel back over
//!    a channel that is drained only once every task has finished.
//! 2. **Merge** (barrier): the master's and work packages' change sets are
//!    merged once, on a blocking thread.
//! 3. **Master push**: the new master is pushed first. If that fails no
//!    work package is pushed, so no merged edit is lost.
//! 4. **Split / push** (fan-out): each work package gets its view of the
//!    new master. Work packages missing remotely are created here, so a
//!    run that never reaches this point leaves the remote untouched.
//! 5. **Commit**: the base store records the new bases of synced projects
//!    and carries the old ones of projects that failed. Locks are released
//!    on every path.
//!
//! Failures are per project. Only a configuration problem or a base store
//! commit failure fails the whole run.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use workpack_core::{
    ChangeSet, ChangeSummary, Config, Dataset, ProjectId, RunId, SnapshotKind, VersionToken,
    WorkPackage, WorkPackageName,
};
use workpack_sync::{
    split, BaseStore, BaseUpdate, ChangeExtractor, Conflict, ConflictPolicy,
    MergeEngine, MergeError, MergeOutcome,
};

use crate::artifacts::ArtifactWriter;
use crate::error::{RemoteError, RunError};
use crate::remote::{LockHandle, RemoteStore};
use crate::retry::{push_with_retry, RetryConfig};
use crate::state::{Phase, ProjectRole, ProjectStatus, ProjectSyncState};

/// Default size of the worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 8;

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// Runtime knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_workers: usize,
    pub retry: RetryConfig,
    pub conflict_policy: ConflictPolicy,
    /// Pull and compute everything, but take no locks, push nothing and
    /// commit no base.
    pub dry_run: bool,
    /// Keep base/input/output snapshots of the run under this directory.
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryConfig::default(),
            conflict_policy: ConflictPolicy::default(),
            dry_run: false,
            artifacts_dir: None,
        }
    }
}

/// Outcome of one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub key: String,
    pub project: ProjectId,
    pub role: ProjectRole,
    #[serde(flatten)]
    pub status: ProjectStatus,
    pub local_changes: ChangeSummary,
    pub pushed_changes: ChangeSummary,
    pub pulled_version: Option<VersionToken>,
    pub pushed_version: Option<VersionToken>,
    pub push_attempts: u32,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Master first, then work packages in declaration order.
    pub projects: Vec<ProjectReport>,
    pub conflicts: Vec<Conflict>,
    pub base_committed: bool,
    pub artifacts: Option<PathBuf>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &ProjectReport> {
        self.projects
            .iter()
            .filter(|p| matches!(p.status, ProjectStatus::Failed { .. }))
    }

    /// No project failed. Projects skipped because of a busy lock do not
    /// count as failures.
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn project(&self, key: &str) -> Option<&ProjectReport> {
        self.projects.iter().find(|p| p.key == key)
    }
}

// ---------------------------------------------------------------------------
// Internal per-project bookkeeping
// ---------------------------------------------------------------------------

struct Slot {
    state: ProjectSyncState,
    work_package: Option<WorkPackage>,
    /// Base recorded by the previous run.
    stored_base: Option<Dataset>,
    prepared: Option<Prepared>,
    output: Option<Dataset>,
}

impl Slot {
    fn key(&self) -> String {
        self.state.role.key()
    }
}

struct PrepareJob {
    idx: usize,
    role: ProjectRole,
    project: ProjectId,
    stored_base: Option<Dataset>,
    dry_run: bool,
}

struct Prepared {
    /// Work package declared but not yet present remotely. It is created
    /// only once the merge has succeeded.
    missing: bool,
    input: Dataset,
    version: Option<VersionToken>,
    /// Base the changes were extracted from; `None` when the project
    /// contributes no changes this run.
    base: Option<Dataset>,
    changes: Option<ChangeSet>,
}

enum PrepareFailure {
    Busy,
    Failed { phase: Phase, reason: String },
}

impl PrepareFailure {
    fn at(phase: Phase, reason: impl ToString) -> Self {
        PrepareFailure::Failed {
            phase,
            reason: reason.to_string(),
        }
    }
}

struct PrepareMessage {
    idx: usize,
    lock: Option<LockHandle>,
    result: Result<Prepared, PrepareFailure>,
}

struct SplitJob {
    idx: usize,
    work_package: WorkPackage,
    input: Option<Dataset>,
    version: Option<VersionToken>,
    create: bool,
}

struct SplitDone {
    output: Dataset,
    pushed: ChangeSummary,
    version: Option<VersionToken>,
    attempts: u32,
}

type SplitMessage = (
    usize,
    Option<LockHandle>,
    Result<SplitDone, (Phase, String, u32)>,
);

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one synchronization run of a master and its work packages.
pub struct Orchestrator<R: ?Sized> {
    remote: Arc<R>,
    config: Arc<Config>,
    master: ProjectId,
    base_store: BaseStore,
    options: RunOptions,
    extractor: Arc<ChangeExtractor>,
}

impl<R: RemoteStore + ?Sized + 'static> Orchestrator<R> {
    pub fn new(
        remote: Arc<R>,
        config: Config,
        master: ProjectId,
        base_store: BaseStore,
        options: RunOptions,
    ) -> Self {
        Self {
            remote,
            config: Arc::new(config),
            master,
            base_store,
            options,
            extractor: Arc::new(ChangeExtractor::new()),
        }
    }

    /// Run one synchronization.
    ///
    /// Returns `Err` only for run-level failures; per-project failures are
    /// reported in the [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, RunError> {
        self.config.check_master(&self.master)?;

        let started_at = Utc::now();
        let run_id = RunId::at(started_at);
        tracing::info!(
            run_id = %run_id,
            master = %self.master,
            work_packages = self.config.work_packages.len(),
            dry_run = self.options.dry_run,
            "sync run started"
        );

        let mut slots = self.load_slots();
        let conflicts = self.reconcile(&mut slots).await;

        let committed = if self.options.dry_run {
            Ok(false)
        } else {
            self.commit(&run_id, &slots).await
        };
        self.unlock_all(&mut slots).await;
        let base_committed = committed?;

        let artifacts = self.options.artifacts_dir.as_ref().map(|root| {
            let writer = ArtifactWriter::new(root, &run_id);
            write_artifacts(&writer, &slots);
            writer.dir().to_path_buf()
        });

        let projects: Vec<ProjectReport> = slots.into_iter().map(report_of).collect();
        for p in &projects {
            match &p.status {
                ProjectStatus::Synced => tracing::info!(
                    project = %p.project,
                    pushed = p.pushed_changes.total(),
                    "project synced"
                ),
                ProjectStatus::SkippedLocked => {
                    tracing::info!(project = %p.project, "project skipped (locked)")
                }
                ProjectStatus::Skipped { reason } => {
                    tracing::info!(project = %p.project, reason = %reason, "project skipped")
                }
                ProjectStatus::Failed { phase, reason } => tracing::warn!(
                    project = %p.project,
                    phase = %phase,
                    reason = %reason,
                    "project failed"
                ),
            }
        }

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: self.options.dry_run,
            projects,
            conflicts,
            base_committed,
            artifacts,
        })
    }

    fn load_slots(&self) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(self.config.work_packages.len() + 1);
        slots.push(Slot {
            state: ProjectSyncState::new(ProjectRole::Master, self.master.clone()),
            work_package: None,
            stored_base: None,
            prepared: None,
            output: None,
        });
        for wp in &self.config.work_packages {
            slots.push(Slot {
                state: ProjectSyncState::new(
                    ProjectRole::WorkPackage(wp.name.clone()),
                    wp.project.clone(),
                ),
                work_package: Some(wp.clone()),
                stored_base: None,
                prepared: None,
                output: None,
            });
        }
        for slot in &mut slots {
            match self.base_store.load(&slot.key()) {
                Ok(entry) => slot.stored_base = entry.map(|e| e.snapshot.dataset),
                Err(err) => slot.state.fail(format!("base snapshot unusable: {err}")),
            }
        }
        slots
    }

    /// Everything between loading bases and committing them. Failures are
    /// recorded on the slots.
    async fn reconcile(&self, slots: &mut [Slot]) -> Vec<Conflict> {
        if !slots[0].state.is_failed() {
            self.prepare_all(slots).await;
        }

        if slots[0].state.is_failed() {
            let master_locked =
                matches!(slots[0].state.status(), Some(ProjectStatus::SkippedLocked));
            for slot in slots.iter_mut().skip(1) {
                if master_locked {
                    slot.state.skip("master locked elsewhere");
                } else {
                    slot.state.fail("master unavailable");
                }
            }
            return Vec::new();
        }

        let merged = match self.merge(slots).await {
            Ok(merged) => merged,
            Err((reason, conflicts)) => {
                for slot in slots.iter_mut() {
                    slot.state.fail(reason.clone());
                }
                return conflicts;
            }
        };
        for slot in slots.iter_mut() {
            slot.state.advance_to(Phase::Merged);
        }

        let master_output = Arc::new(merged.master);
        self.push_master(&mut slots[0], &master_output).await;
        if slots[0].state.is_failed() {
            for slot in slots.iter_mut().skip(1) {
                slot.state.fail("master push failed");
            }
            return merged.conflicts;
        }

        self.split_all(slots, &master_output).await;
        merged.conflicts
    }

    // -----------------------------------------------------------------------
    // Prepare
    // -----------------------------------------------------------------------

    async fn prepare_all(&self, slots: &mut [Slot]) {
        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let (tx, mut rx) = mpsc::channel::<PrepareMessage>(slots.len().max(1));
        let mut set = JoinSet::new();

        for (idx, slot) in slots.iter().enumerate() {
            if slot.state.is_failed() {
                continue;
            }
            let job = PrepareJob {
                idx,
                role: slot.state.role.clone(),
                project: slot.state.project.clone(),
                stored_base: slot.stored_base.clone(),
                dry_run: self.options.dry_run,
            };
            let remote = self.remote.clone();
            let extractor = self.extractor.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let mut lock = None;
                let result = prepare(&job, remote.as_ref(), &extractor, &mut lock).await;
                let _ = tx
                    .send(PrepareMessage {
                        idx: job.idx,
                        lock,
                        result,
                    })
                    .await;
            });
        }
        drop(tx);

        // Barrier: every prepare task has finished before any result is used.
        while let Some(joined) = set.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "prepare task join failure");
            }
        }

        let mut reported = vec![false; slots.len()];
        while let Some(msg) = rx.recv().await {
            reported[msg.idx] = true;
            let slot = &mut slots[msg.idx];
            slot.state.lock = msg.lock;
            match msg.result {
                Ok(prepared) => {
                    slot.state.advance_to(Phase::Extracting);
                    slot.state.pulled_version = prepared.version.clone();
                    if let Some(changes) = &prepared.changes {
                        slot.state.local_changes = changes.summary();
                    }
                    slot.prepared = Some(prepared);
                }
                Err(PrepareFailure::Busy) => {
                    slot.state.advance_to(Phase::Locking);
                    slot.state.skip_locked();
                }
                Err(PrepareFailure::Failed { phase, reason }) => {
                    slot.state.advance_to(phase);
                    slot.state.fail(reason);
                }
            }
        }
        for (slot, reported) in slots.iter_mut().zip(reported) {
            if !reported && !slot.state.is_failed() {
                slot.state.fail("prepare task aborted");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    async fn merge(
        &self,
        slots: &[Slot],
    ) -> Result<MergeOutcome, (String, Vec<Conflict>)> {
        let Some(master) = slots[0].prepared.as_ref() else {
            return Err(("master unavailable".to_string(), Vec::new()));
        };
        let master_base = master.base.clone().unwrap_or_else(|| master.input.clone());
        let master_changes = master.changes.clone().unwrap_or_default();
        let wp_changes: Vec<(WorkPackageName, ChangeSet)> = slots
            .iter()
            .skip(1)
            .filter(|slot| !slot.state.is_failed())
            .filter_map(|slot| {
                let name = slot.work_package.as_ref()?.name.clone();
                let changes = slot.prepared.as_ref()?.changes.clone()?;
                Some((name, changes))
            })
            .collect();

        let engine = MergeEngine::new(self.options.conflict_policy);
        let joined = tokio::task::spawn_blocking(move || {
            engine.merge(&master_base, &master_changes, &wp_changes)
        })
        .await;
        match joined {
            Ok(Ok(merged)) => {
                tracing::info!(
                    consolidated = merged.consolidated.summary().total(),
                    conflicts = merged.conflicts.len(),
                    "merge complete"
                );
                Ok(merged)
            }
            Ok(Err(MergeError::Conflicts(conflicts))) => Err((
                format!("merge rejected: {} conflicting row edit(s)", conflicts.len()),
                conflicts,
            )),
            Ok(Err(err)) => Err((format!("merge failed: {err}"), Vec::new())),
            Err(err) => Err((format!("merge task join failure: {err}"), Vec::new())),
        }
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    async fn push_master(&self, slot: &mut Slot, master_output: &Arc<Dataset>) {
        let Some((input, version)) = slot
            .prepared
            .as_ref()
            .map(|p| (p.input.clone(), p.version.clone()))
        else {
            slot.state.fail("master unavailable");
            return;
        };
        slot.state.advance_to(Phase::Splitting);
        let extractor = self.extractor.clone();
        let output = master_output.clone();
        let joined =
            tokio::task::spawn_blocking(move || extractor.extract(&input, &output)).await;
        let push = match joined {
            Ok(Ok(push)) => push,
            Ok(Err(err)) => {
                slot.state.fail(format!("master push diff: {err}"));
                return;
            }
            Err(err) => {
                slot.state.fail(format!("master push task join failure: {err}"));
                return;
            }
        };

        slot.state.advance_to(Phase::Pushing);
        match self.send(&slot.state.project, &push, version).await {
            Ok((version, attempts)) => {
                slot.state.pushed_changes = push.summary();
                slot.state.pushed_version = version;
                slot.state.push_attempts = attempts;
                slot.output = Some(master_output.as_ref().clone());
                slot.state.advance_to(Phase::Done);
            }
            Err((reason, attempts)) => {
                slot.state.push_attempts = attempts;
                slot.state.fail(reason);
            }
        }
    }

    /// Push `changes` unless they are empty or this is a dry run.
    async fn send(
        &self,
        project: &ProjectId,
        changes: &ChangeSet,
        version: Option<VersionToken>,
    ) -> Result<(Option<VersionToken>, u32), (String, u32)> {
        send_changes(
            self.remote.as_ref(),
            project,
            changes,
            version,
            &self.options.retry,
            self.options.dry_run,
        )
        .await
    }

    async fn split_all(&self, slots: &mut [Slot], master_output: &Arc<Dataset>) {
        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut set: JoinSet<SplitMessage> = JoinSet::new();

        for (idx, slot) in slots.iter_mut().enumerate().skip(1) {
            if slot.state.is_failed() {
                continue;
            }
            let Some(work_package) = slot.work_package.clone() else {
                continue;
            };
            let Some(prepared) = slot.prepared.as_ref() else {
                slot.state.fail("work package not prepared");
                continue;
            };
            slot.state.advance_to(Phase::Splitting);
            let job = SplitJob {
                idx,
                work_package,
                input: (!prepared.input.tables.is_empty()).then(|| prepared.input.clone()),
                version: prepared.version.clone(),
                create: prepared.missing && !self.options.dry_run,
            };
            let remote = self.remote.clone();
            let extractor = self.extractor.clone();
            let semaphore = semaphore.clone();
            let master_output = master_output.clone();
            let retry = self.options.retry.clone();
            let dry_run = self.options.dry_run;
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (job.idx, None, Err((Phase::Splitting, "worker pool closed".into(), 0)));
                };
                let idx = job.idx;
                let project = job.work_package.project.clone();
                let mut lock = None;
                let mut version = job.version;
                if job.create {
                    match create_project(remote.as_ref(), &project, &mut lock).await {
                        Ok(created) => version = Some(created),
                        Err(reason) => return (idx, lock, Err((Phase::Splitting, reason, 0))),
                    }
                }
                let split_out = tokio::task::spawn_blocking(move || {
                    split(&*extractor, &master_output, &job.work_package, job.input.as_ref())
                })
                .await;
                let out = match split_out {
                    Ok(Ok(out)) => out,
                    Ok(Err(err)) => return (idx, lock, Err((Phase::Splitting, err.to_string(), 0))),
                    Err(err) => {
                        let reason = format!("split task join failure: {err}");
                        return (idx, lock, Err((Phase::Splitting, reason, 0)));
                    }
                };
                match send_changes(remote.as_ref(), &project, &out.push, version, &retry, dry_run).await {
                    Ok((version, attempts)) => (
                        idx,
                        lock,
                        Ok(SplitDone {
                            pushed: out.push.summary(),
                            output: out.output,
                            version,
                            attempts,
                        }),
                    ),
                    Err((reason, attempts)) => (idx, lock, Err((Phase::Pushing, reason, attempts))),
                }
            });
        }

        let mut reported = vec![false; slots.len()];
        while let Some(joined) = set.join_next().await {
            let (idx, lock, result) = match joined {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::error!(error = %err, "split task join failure");
                    continue;
                }
            };
            reported[idx] = true;
            let slot = &mut slots[idx];
            if lock.is_some() {
                slot.state.lock = lock;
            }
            match result {
                Ok(done) => {
                    slot.state.advance_to(Phase::Pushing);
                    slot.state.pushed_changes = done.pushed;
                    slot.state.pushed_version = done.version;
                    slot.state.push_attempts = done.attempts;
                    slot.output = Some(done.output);
                    slot.state.advance_to(Phase::Done);
                }
                Err((phase, reason, attempts)) => {
                    slot.state.advance_to(phase);
                    slot.state.push_attempts = attempts;
                    slot.state.fail(reason);
                }
            }
        }
        for (slot, reported) in slots.iter_mut().zip(reported).skip(1) {
            if !reported && !slot.state.phase().is_terminal() {
                slot.state.fail("split task aborted");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commit and cleanup
    // -----------------------------------------------------------------------

    /// Record new bases for synced projects and carry the previous ones of
    /// the rest. Nothing is written when no project synced.
    async fn commit(&self, run_id: &RunId, slots: &[Slot]) -> Result<bool, RunError> {
        let mut updates = Vec::new();
        let mut carry = Vec::new();
        for slot in slots {
            match (slot.state.status(), &slot.output) {
                (Some(ProjectStatus::Synced), Some(output)) => {
                    let version = slot
                        .state
                        .pushed_version
                        .clone()
                        .or_else(|| slot.state.pulled_version.clone())
                        .unwrap_or_else(|| VersionToken::from("0"));
                    updates.push(BaseUpdate {
                        key: slot.key(),
                        project: slot.state.project.clone(),
                        version,
                        dataset: output.clone(),
                    });
                }
                _ => carry.push(slot.key()),
            }
        }
        if updates.is_empty() {
            return Ok(false);
        }

        let store = self.base_store.clone();
        let run_id = run_id.clone();
        tokio::task::spawn_blocking(move || store.commit(&run_id, Utc::now(), &updates, &carry))
            .await
            .map_err(|err| RunError::Join {
                task: "base commit",
                reason: err.to_string(),
            })??;
        Ok(true)
    }

    async fn unlock_all(&self, slots: &mut [Slot]) {
        for slot in slots.iter_mut() {
            let Some(handle) = slot.state.lock.take() else {
                continue;
            };
            if let Err(err) = self.remote.unlock(&handle).await {
                tracing::warn!(project = %handle.project, error = %err, "failed to release lock");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task bodies
// ---------------------------------------------------------------------------

async fn prepare<R: RemoteStore + ?Sized>(
    job: &PrepareJob,
    remote: &R,
    extractor: &Arc<ChangeExtractor>,
    lock: &mut Option<LockHandle>,
) -> Result<Prepared, PrepareFailure> {
    let exists = remote
        .exists(&job.project)
        .await
        .map_err(|e| PrepareFailure::at(Phase::Locking, e))?;
    if !exists {
        if job.role == ProjectRole::Master {
            return Err(PrepareFailure::at(
                Phase::Locking,
                format!("master project {} does not exist", job.project),
            ));
        }
        if job.dry_run {
            tracing::info!(project = %job.project, "[dry-run] would create project");
        } else {
            tracing::info!(project = %job.project, "project missing, created after merge");
        }
        return Ok(Prepared {
            missing: true,
            input: Dataset::default(),
            version: None,
            base: None,
            changes: None,
        });
    }

    if !job.dry_run {
        match remote.lock(&job.project).await {
            Ok(handle) => *lock = Some(handle),
            Err(RemoteError::Busy { .. }) => return Err(PrepareFailure::Busy),
            Err(err) => return Err(PrepareFailure::at(Phase::Locking, err)),
        }
    }

    let (input, version) = remote
        .pull(&job.project)
        .await
        .map_err(|e| PrepareFailure::at(Phase::Pulling, e))?;
    tracing::debug!(project = %job.project, rows = input.row_count(), "pulled");

    // Without a recorded base a work package contributes nothing and is
    // resynced from the master; the master diffs against its own input.
    let base = job.stored_base.clone();

    let changes = match &base {
        Some(base) => {
            let extractor = extractor.clone();
            let (base, current) = (base.clone(), input.clone());
            let extracted =
                tokio::task::spawn_blocking(move || extractor.extract(&base, &current))
                    .await
                    .map_err(|e| PrepareFailure::at(Phase::Extracting, e))?
                    .map_err(|e| PrepareFailure::at(Phase::Extracting, e))?;
            tracing::debug!(
                project = %job.project,
                changes = extracted.summary().total(),
                "extracted"
            );
            Some(extracted)
        }
        None => None,
    };

    Ok(Prepared {
        missing: false,
        input,
        version: Some(version),
        base,
        changes,
    })
}

/// Create a newly declared work package's project, lock it and read the
/// version a first push targets.
async fn create_project<R: RemoteStore + ?Sized>(
    remote: &R,
    project: &ProjectId,
    lock: &mut Option<LockHandle>,
) -> Result<VersionToken, String> {
    remote
        .create(project)
        .await
        .map_err(|e| format!("create failed: {e}"))?;
    *lock = Some(
        remote
            .lock(project)
            .await
            .map_err(|e| format!("lock after create failed: {e}"))?,
    );
    let (_, version) = remote
        .pull(project)
        .await
        .map_err(|e| format!("pull after create failed: {e}"))?;
    Ok(version)
}

async fn send_changes<R: RemoteStore + ?Sized>(
    remote: &R,
    project: &ProjectId,
    changes: &ChangeSet,
    version: Option<VersionToken>,
    retry: &RetryConfig,
    dry_run: bool,
) -> Result<(Option<VersionToken>, u32), (String, u32)> {
    if changes.is_empty() {
        tracing::debug!(project = %project, "nothing to push");
        return Ok((version, 0));
    }
    if dry_run {
        tracing::info!(
            project = %project,
            changes = changes.summary().total(),
            "[dry-run] would push"
        );
        return Ok((version, 0));
    }
    let Some(base_version) = version else {
        return Err(("no pulled version to push against".to_string(), 0));
    };
    match push_with_retry(remote, project, changes, &base_version, retry).await {
        Ok(pushed) => Ok((Some(pushed.version), pushed.attempts)),
        Err(failed) => Err((
            format!("push failed after {} attempt(s): {}", failed.attempts, failed.error),
            failed.attempts,
        )),
    }
}

fn write_artifacts(writer: &ArtifactWriter, slots: &[Slot]) {
    for slot in slots {
        let key = slot.key();
        let project = &slot.state.project;
        let stages = [
            (SnapshotKind::Base, slot.prepared.as_ref().and_then(|p| p.base.as_ref())),
            (SnapshotKind::Input, slot.prepared.as_ref().map(|p| &p.input)),
            (SnapshotKind::Output, slot.output.as_ref()),
        ];
        for (kind, dataset) in stages {
            let Some(dataset) = dataset else {
                continue;
            };
            if let Err(err) = writer.write(kind, &key, project, dataset) {
                tracing::warn!(project = %project, error = %err, "failed to keep {kind} artifact");
            }
        }
    }
}

fn report_of(slot: Slot) -> ProjectReport {
    let key = slot.key();
    let state = slot.state;
    let status = state.status().cloned().unwrap_or(ProjectStatus::Failed {
        phase: state.phase(),
        reason: "run ended before the project finished".to_string(),
    });
    ProjectReport {
        key,
        project: state.project.clone(),
        role: state.role.clone(),
        status,
        local_changes: state.local_changes,
        pushed_changes: state.pushed_changes,
        pulled_version: state.pulled_version.clone(),
        pushed_version: state.pushed_version.clone(),
        push_attempts: state.push_attempts,
    }
}
