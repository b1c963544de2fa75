//! Base store: the synchronized state left by previous runs.
//!
//! Layout under the store root (the master project's
//! `work-packages/base/` directory):
//!
//! ```text
//! <run-id>/manifest.json      run id, commit time, per-project version + SHA-256
//! <run-id>/<project-key>.json one base snapshot per project
//! ```
//!
//! A commit is written into a hidden `.tmp-<run-id>` sibling and renamed
//! into place, so a run directory is either complete or absent. Only the
//! newest few run directories are kept.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use workpack_core::{Dataset, ProjectId, RunId, Snapshot, SnapshotKind, VersionToken};

use crate::error::{io_err, SyncError};

/// Run directories kept after a commit.
pub const DEFAULT_KEEP: usize = 5;

const MANIFEST_FILE: &str = "manifest.json";

/// Manifest record for one project of a committed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub project: ProjectId,
    /// Remote version the snapshot corresponds to.
    pub version: VersionToken,
    /// Hex SHA-256 of the snapshot file.
    pub sha256: String,
}

/// `manifest.json` of one committed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseManifest {
    pub run_id: RunId,
    pub committed_at: DateTime<Utc>,
    /// Keyed by project key (`master` or the work-package name).
    pub projects: BTreeMap<String, ManifestEntry>,
}

/// A loaded base snapshot with its manifest record.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseEntry {
    pub project: ProjectId,
    pub version: VersionToken,
    pub snapshot: Snapshot,
}

/// New base state for one project, produced by a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseUpdate {
    pub key: String,
    pub project: ProjectId,
    pub version: VersionToken,
    pub dataset: Dataset,
}

/// Directory-backed store of committed base snapshots.
#[derive(Debug, Clone)]
pub struct BaseStore {
    root: PathBuf,
    keep: usize,
}

impl BaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep: DEFAULT_KEEP,
        }
    }

    /// Keep at most `keep` run directories (never fewer than one).
    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Committed run ids, oldest first.
    pub fn runs(&self) -> Result<Vec<RunId>, SyncError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&self.root, err)),
        };
        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().join(MANIFEST_FILE).is_file() {
                continue;
            }
            runs.push(RunId(name));
        }
        runs.sort();
        Ok(runs)
    }

    /// Manifest of the most recent committed run, if any.
    pub fn manifest(&self) -> Result<Option<BaseManifest>, SyncError> {
        let Some(run) = self.runs()?.pop() else {
            return Ok(None);
        };
        let path = self.root.join(&run.0).join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Latest base snapshot for `key`, verified against its manifest hash.
    ///
    /// Returns `None` when no run has recorded that project yet.
    pub fn load(&self, key: &str) -> Result<Option<BaseEntry>, SyncError> {
        let Some(manifest) = self.manifest()? else {
            return Ok(None);
        };
        let Some(entry) = manifest.projects.get(key) else {
            return Ok(None);
        };
        let path = snapshot_path(&self.root.join(&manifest.run_id.0), key);
        let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
        if sha256_hex(&bytes) != entry.sha256 {
            return Err(SyncError::CorruptSnapshot { path });
        }
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Some(BaseEntry {
            project: entry.project.clone(),
            version: entry.version.clone(),
            snapshot,
        }))
    }

    /// Commit a new run.
    ///
    /// `updates` become the new bases of the projects that synced; projects
    /// named in `carry` keep the snapshot of the previous run unchanged.
    /// Projects in neither list are dropped from the store.
    pub fn commit(
        &self,
        run_id: &RunId,
        committed_at: DateTime<Utc>,
        updates: &[BaseUpdate],
        carry: &[String],
    ) -> Result<BaseManifest, SyncError> {
        let previous = self.manifest()?;
        let tmp = self.root.join(format!(".tmp-{run_id}"));
        let dest = self.root.join(&run_id.0);
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp).map_err(|e| io_err(&tmp, e))?;
        }
        std::fs::create_dir_all(&tmp).map_err(|e| io_err(&tmp, e))?;

        let mut projects = BTreeMap::new();
        for update in updates {
            let snapshot = Snapshot {
                project: update.project.clone(),
                run_id: run_id.clone(),
                kind: SnapshotKind::Base,
                taken_at: committed_at,
                dataset: update.dataset.clone(),
            };
            let bytes = serde_json::to_vec_pretty(&snapshot)?;
            let path = snapshot_path(&tmp, &update.key);
            std::fs::write(&path, &bytes).map_err(|e| io_err(&path, e))?;
            projects.insert(
                update.key.clone(),
                ManifestEntry {
                    project: update.project.clone(),
                    version: update.version.clone(),
                    sha256: sha256_hex(&bytes),
                },
            );
        }

        if let Some(previous) = &previous {
            let prev_dir = self.root.join(&previous.run_id.0);
            for key in carry {
                if projects.contains_key(key) {
                    continue;
                }
                let Some(entry) = previous.projects.get(key) else {
                    continue;
                };
                let from = snapshot_path(&prev_dir, key);
                let to = snapshot_path(&tmp, key);
                std::fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
                projects.insert(key.clone(), entry.clone());
                tracing::debug!("base {key}: carried over from run {}", previous.run_id);
            }
        }

        let manifest = BaseManifest {
            run_id: run_id.clone(),
            committed_at,
            projects,
        };
        let manifest_path = tmp.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&manifest_path, json).map_err(|e| io_err(&manifest_path, e))?;

        if dest.exists() {
            std::fs::remove_dir_all(&dest).map_err(|e| io_err(&dest, e))?;
        }
        if let Err(e) = std::fs::rename(&tmp, &dest) {
            let _ = std::fs::remove_dir_all(&tmp);
            return Err(io_err(&dest, e));
        }
        tracing::info!(
            "committed base run {run_id} ({} project(s))",
            manifest.projects.len()
        );

        self.prune()?;
        Ok(manifest)
    }

    /// Delete all but the newest `keep` run directories.
    pub fn prune(&self) -> Result<Vec<RunId>, SyncError> {
        let runs = self.runs()?;
        let excess = runs.len().saturating_sub(self.keep);
        let mut removed = Vec::with_capacity(excess);
        for run in runs.into_iter().take(excess) {
            let dir = self.root.join(&run.0);
            std::fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            tracing::debug!("pruned base run {run}");
            removed.push(run);
        }
        Ok(removed)
    }
}

fn snapshot_path(run_dir: &Path, key: &str) -> PathBuf {
    run_dir.join(format!("{key}.json"))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}
