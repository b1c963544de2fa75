//! Directory-backed [`RemoteStore`].
//!
//! One directory per project under the store root:
//!
//! ```text
//! <root>/<project>/dataset.json   current dataset
//! <root>/<project>/version        monotonically increasing integer
//! <root>/<project>/lock           present while a process holds the lock
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use workpack_core::{ChangeSet, Dataset, ProjectId, VersionToken};

use crate::error::{io_err, RemoteError};
use crate::remote::{LockHandle, RemoteStore};

const DATASET_FILE: &str = "dataset.json";
const VERSION_FILE: &str = "version";
const LOCK_FILE: &str = "lock";

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FsRemoteStore {
    root: PathBuf,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `project`.
    pub fn project_dir(&self, project: &ProjectId) -> PathBuf {
        self.root.join(&project.0)
    }

    async fn read_version(&self, project: &ProjectId) -> Result<u64, RemoteError> {
        let path = self.project_dir(project).join(VERSION_FILE);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RemoteError::NotFound {
                    project: project.clone(),
                })
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        text.trim().parse().map_err(|_| RemoteError::Unavailable {
            project: project.clone(),
            reason: format!("unreadable version file {}", path.display()),
        })
    }

    async fn write_state(
        &self,
        project: &ProjectId,
        dataset: &Dataset,
        version: u64,
    ) -> Result<(), RemoteError> {
        let dir = self.project_dir(project);
        let json = serde_json::to_vec_pretty(dataset)?;
        write_atomic(&dir.join(DATASET_FILE), &json).await?;
        write_atomic(&dir.join(VERSION_FILE), version.to_string().as_bytes()).await
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), RemoteError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(path, e));
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for FsRemoteStore {
    async fn exists(&self, project: &ProjectId) -> Result<bool, RemoteError> {
        let path = self.project_dir(project).join(VERSION_FILE);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn create(&self, project: &ProjectId) -> Result<(), RemoteError> {
        let dir = self.project_dir(project);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;
        self.write_state(project, &Dataset::default(), 0).await?;
        tracing::info!(project = %project, "created project");
        Ok(())
    }

    async fn lock(&self, project: &ProjectId) -> Result<LockHandle, RemoteError> {
        let path = self.project_dir(project).join(LOCK_FILE);
        let token = format!(
            "{}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_millis(),
            LOCK_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(RemoteError::Busy {
                    project: project.clone(),
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RemoteError::NotFound {
                    project: project.clone(),
                })
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        file.write_all(token.as_bytes())
            .await
            .map_err(|e| io_err(&path, e))?;
        Ok(LockHandle {
            project: project.clone(),
            token,
        })
    }

    async fn unlock(&self, handle: &LockHandle) -> Result<(), RemoteError> {
        let path = self.project_dir(&handle.project).join(LOCK_FILE);
        let held = match tokio::fs::read_to_string(&path).await {
            Ok(held) => held,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_err(&path, err)),
        };
        if held.trim() != handle.token {
            return Err(RemoteError::Busy {
                project: handle.project.clone(),
            });
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn pull(&self, project: &ProjectId) -> Result<(Dataset, VersionToken), RemoteError> {
        let version = self.read_version(project).await?;
        let path = self.project_dir(project).join(DATASET_FILE);
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))?;
        let dataset = serde_json::from_slice(&bytes)?;
        Ok((dataset, VersionToken(version.to_string())))
    }

    async fn push(
        &self,
        project: &ProjectId,
        changes: &ChangeSet,
        base_version: &VersionToken,
    ) -> Result<VersionToken, RemoteError> {
        let current = self.read_version(project).await?;
        if current.to_string() != base_version.0 {
            return Err(RemoteError::Conflict {
                project: project.clone(),
                current: VersionToken(current.to_string()),
            });
        }
        let (dataset, _) = self.pull(project).await?;
        let updated = changes
            .apply(&dataset)
            .map_err(|source| RemoteError::Rejected {
                project: project.clone(),
                source,
            })?;
        let next = current + 1;
        self.write_state(project, &updated, next).await?;
        Ok(VersionToken(next.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use workpack_core::{Row, RowChange, RowId, Table, TableName, Value};

    use super::*;

    fn changes(fid: i64) -> ChangeSet {
        let mut cs = ChangeSet::new();
        cs.record(
            &TableName::from("farms"),
            "fid",
            RowId::from(fid),
            RowChange::Insert {
                row: Row::from([("fid".to_string(), Value::Integer(fid))]),
            },
        );
        cs
    }

    #[tokio::test]
    async fn create_pull_push_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FsRemoteStore::new(tmp.path());
        let project = ProjectId::from("org/farms");
        assert!(!store.exists(&project).await.unwrap());

        store.create(&project).await.unwrap();
        let (dataset, v0) = store.pull(&project).await.unwrap();
        assert_eq!(dataset, Dataset::default());

        let v1 = store.push(&project, &changes(1), &v0).await.unwrap();
        assert_ne!(v0, v1);
        let (dataset, pulled) = store.pull(&project).await.unwrap();
        assert_eq!(pulled, v1);
        assert_eq!(dataset.tables, vec![{
            let mut t = Table::new("farms", "fid");
            t.rows = vec![Row::from([("fid".to_string(), Value::Integer(1))])];
            t
        }]);
    }

    #[tokio::test]
    async fn stale_push_reports_current_version() {
        let tmp = TempDir::new().unwrap();
        let store = FsRemoteStore::new(tmp.path());
        let project = ProjectId::from("p");
        store.create(&project).await.unwrap();
        let (_, v0) = store.pull(&project).await.unwrap();
        let v1 = store.push(&project, &changes(1), &v0).await.unwrap();

        let err = store.push(&project, &changes(2), &v0).await.unwrap_err();
        match err {
            RemoteError::Conflict { current, .. } => assert_eq!(current, v1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn second_lock_is_busy_until_unlocked() {
        let tmp = TempDir::new().unwrap();
        let store = FsRemoteStore::new(tmp.path());
        let project = ProjectId::from("p");
        store.create(&project).await.unwrap();

        let handle = store.lock(&project).await.unwrap();
        assert!(matches!(store.lock(&project).await, Err(RemoteError::Busy { .. })));
        store.unlock(&handle).await.unwrap();
        let again = store.lock(&project).await.unwrap();
        assert_ne!(again.token, handle.token);
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsRemoteStore::new(tmp.path());
        let err = store.pull(&ProjectId::from("nope")).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }
}
