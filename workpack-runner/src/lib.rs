//! # workpack-runner
//!
//! Async side of workpack: the remote project store port, a
//! directory-backed store, push retry, and the [`Orchestrator`] that runs
//! one synchronization of a master project and its work packages.

pub mod artifacts;
pub mod error;
pub mod fs_remote;
pub mod orchestrator;
pub mod remote;
pub mod retry;
pub mod state;

pub use error::{RemoteError, RunError};
pub use fs_remote::FsRemoteStore;
pub use orchestrator::{Orchestrator, ProjectReport, RunOptions, RunReport, DEFAULT_MAX_WORKERS};
pub use remote::{LockHandle, RemoteStore};
pub use retry::RetryConfig;
pub use state::{Phase, ProjectRole, ProjectStatus, ProjectSyncState};

/// Install the global subscriber: `RUST_LOG`-style filter, `info` by
/// default. `json` switches to one JSON object per event.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
