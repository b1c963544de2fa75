//! Bounded push retry with exponential backoff.

use std::time::Duration;

use workpack_core::{ChangeSet, ProjectId, VersionToken};

use crate::error::RemoteError;
use crate::remote::RemoteStore;

/// Retry behaviour for pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff is capped here.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Same attempt budget, no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// A successful push and the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pushed {
    pub version: VersionToken,
    pub attempts: u32,
}

/// A push that gave up.
#[derive(Debug)]
pub struct PushFailed {
    pub error: RemoteError,
    pub attempts: u32,
}

/// Push `changes`, retrying retryable failures up to `config.max_attempts`.
///
/// After a version conflict the next attempt targets the version the
/// remote reported as current.
pub async fn push_with_retry<R: RemoteStore + ?Sized>(
    remote: &R,
    project: &ProjectId,
    changes: &ChangeSet,
    base_version: &VersionToken,
    config: &RetryConfig,
) -> Result<Pushed, PushFailed> {
    let max_attempts = config.max_attempts.max(1);
    let mut version = base_version.clone();
    let mut delay = config.base_delay;
    let mut attempt = 1;
    loop {
        match remote.push(project, changes, &version).await {
            Ok(version) => {
                return Ok(Pushed {
                    version,
                    attempts: attempt,
                })
            }
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    project = %project,
                    attempt,
                    max_attempts,
                    error = %error,
                    "push failed, retrying in {delay:?}"
                );
                if let RemoteError::Conflict { current, .. } = &error {
                    version = current.clone();
                }
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, config.max_delay);
                attempt += 1;
            }
            Err(error) => {
                return Err(PushFailed {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use workpack_core::Dataset;

    use super::*;
    use crate::remote::LockHandle;

    /// Fails the first `failures` pushes with the given error kind.
    struct Flaky {
        failures: Mutex<u32>,
        conflict: bool,
        seen: Mutex<Vec<VersionToken>>,
    }

    impl Flaky {
        fn new(failures: u32, conflict: bool) -> Self {
            Self {
                failures: Mutex::new(failures),
                conflict,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteStore for Flaky {
        async fn exists(&self, _: &ProjectId) -> Result<bool, RemoteError> {
            Ok(true)
        }
        async fn create(&self, _: &ProjectId) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn lock(&self, project: &ProjectId) -> Result<LockHandle, RemoteError> {
            Ok(LockHandle { project: project.clone(), token: "t".into() })
        }
        async fn unlock(&self, _: &LockHandle) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn pull(&self, _: &ProjectId) -> Result<(Dataset, VersionToken), RemoteError> {
            Ok((Dataset::default(), VersionToken::from("1")))
        }
        async fn push(
            &self,
            project: &ProjectId,
            _: &ChangeSet,
            base_version: &VersionToken,
        ) -> Result<VersionToken, RemoteError> {
            self.seen.lock().unwrap().push(base_version.clone());
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(if self.conflict {
                    RemoteError::Conflict { project: project.clone(), current: VersionToken::from("7") }
                } else {
                    RemoteError::Unavailable { project: project.clone(), reason: "timeout".into() }
                });
            }
            Ok(VersionToken::from("8"))
        }
    }

    #[tokio::test]
    async fn succeeds_within_budget() {
        let remote = Flaky::new(2, false);
        let pushed = push_with_retry(
            &remote,
            &ProjectId::from("p"),
            &ChangeSet::new(),
            &VersionToken::from("1"),
            &RetryConfig::immediate(3),
        )
        .await
        .unwrap();
        assert_eq!(pushed.attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let remote = Flaky::new(5, false);
        let failed = push_with_retry(
            &remote,
            &ProjectId::from("p"),
            &ChangeSet::new(),
            &VersionToken::from("1"),
            &RetryConfig::immediate(3),
        )
        .await
        .unwrap_err();
        assert_eq!(failed.attempts, 3);
        assert_eq!(remote.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn conflict_retries_against_current_version() {
        let remote = Flaky::new(1, true);
        push_with_retry(
            &remote,
            &ProjectId::from("p"),
            &ChangeSet::new(),
            &VersionToken::from("1"),
            &RetryConfig::immediate(3),
        )
        .await
        .unwrap();
        assert_eq!(
            *remote.seen.lock().unwrap(),
            vec![VersionToken::from("1"), VersionToken::from("7")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_up_to_cap() {
        let remote = Flaky::new(2, false);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(8),
        };
        let started = tokio::time::Instant::now();
        push_with_retry(&remote, &ProjectId::from("p"), &ChangeSet::new(), &VersionToken::from("1"), &config)
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(13));
    }
}
