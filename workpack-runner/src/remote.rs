//! Remote project store port.

use async_trait::async_trait;

use workpack_core::{ChangeSet, Dataset, ProjectId, VersionToken};

use crate::error::RemoteError;

/// Proof of a held project lock, returned by [`RemoteStore::lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub project: ProjectId,
    pub token: String,
}

/// Versioned remote storage of project datasets.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn exists(&self, project: &ProjectId) -> Result<bool, RemoteError>;

    /// Create an empty project.
    async fn create(&self, project: &ProjectId) -> Result<(), RemoteError>;

    /// Take the project's exclusive lock. Fails with [`RemoteError::Busy`]
    /// when someone else holds it.
    async fn lock(&self, project: &ProjectId) -> Result<LockHandle, RemoteError>;

    async fn unlock(&self, handle: &LockHandle) -> Result<(), RemoteError>;

    /// Current dataset and version of the project.
    async fn pull(&self, project: &ProjectId) -> Result<(Dataset, VersionToken), RemoteError>;

    /// Apply `changes` on top of `base_version`.
    ///
    /// Fails with [`RemoteError::Conflict`] carrying the remote's current
    /// version when the project moved past `base_version`.
    async fn push(
        &self,
        project: &ProjectId,
        changes: &ChangeSet,
        base_version: &VersionToken,
    ) -> Result<VersionToken, RemoteError>;
}
