//! Debug artifacts kept with `--keep-artifacts`.
//!
//! `<dir>/<run-id>/{base,input,output}/<project-key>.json`, one snapshot
//! per project and stage.

use std::path::{Path, PathBuf};

use chrono::Utc;

use workpack_core::{Dataset, ProjectId, RunId, Snapshot, SnapshotKind};

use crate::error::RunError;

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    run_id: RunId,
}

impl ArtifactWriter {
    pub fn new(root: &Path, run_id: &RunId) -> Self {
        Self {
            dir: root.join(&run_id.0),
            run_id: run_id.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(
        &self,
        kind: SnapshotKind,
        key: &str,
        project: &ProjectId,
        dataset: &Dataset,
    ) -> Result<PathBuf, RunError> {
        let dir = self.dir.join(kind.to_string());
        std::fs::create_dir_all(&dir).map_err(|source| RunError::Io {
            path: dir.clone(),
            source,
        })?;
        let snapshot = Snapshot {
            project: project.clone(),
            run_id: self.run_id.clone(),
            kind,
            taken_at: Utc::now(),
            dataset: dataset.clone(),
        };
        let path = dir.join(format!("{key}.json"));
        let json = serde_json::to_vec_pretty(&snapshot).map_err(|e| RunError::Io {
            path: path.clone(),
            source: e.into(),
        })?;
        std::fs::write(&path, json).map_err(|source| RunError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn writes_one_file_per_stage_and_key() {
        let tmp = TempDir::new().unwrap();
        let run = RunId::from("20240101T000000.000Z");
        let writer = ArtifactWriter::new(tmp.path(), &run);
        let path = writer
            .write(SnapshotKind::Input, "TeamA", &ProjectId::from("org/a"), &Dataset::default())
            .unwrap();
        assert_eq!(path, tmp.path().join(&run.0).join("input").join("TeamA.json"));
        let back: Snapshot = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(back.kind, SnapshotKind::Input);
    }
}
