//! `workpack sync`: one merge/split run over a directory-backed store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use workpack_core::{ChangeSummary, Config, ProjectId};
use workpack_runner::{
    init_tracing, FsRemoteStore, Orchestrator, ProjectStatus, RunOptions, RunReport,
    DEFAULT_MAX_WORKERS,
};
use workpack_sync::{BaseStore, ConflictPolicy};

/// Arguments for `workpack sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Master project id, e.g. `org/survey`.
    pub master: String,

    /// Root directory of the project store.
    #[arg(long, default_value = ".")]
    pub store: PathBuf,

    /// Work-package configuration (default: `<store>/<master>/workpack.yml`).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Upper bound on projects processed concurrently.
    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,

    /// Report what would change without locking, pushing or committing bases.
    #[arg(long)]
    pub dry_run: bool,

    /// Fail the run instead of letting the master win conflicting edits.
    #[arg(long)]
    pub strict_conflicts: bool,

    /// Keep base/input/output snapshots of every project for debugging.
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Where kept artifacts go (default: the user cache directory).
    #[arg(long, requires = "keep_artifacts")]
    pub artifacts_dir: Option<PathBuf>,

    /// Print the run report as JSON and log as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.json);

        let master = ProjectId::from(self.master.as_str());
        let master_dir = self.store.join(&master.0);
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(|| master_dir.join("workpack.yml"));
        let config = Config::load(&config_path)
            .with_context(|| format!("invalid configuration {}", config_path.display()))?;

        let artifacts_dir = if self.keep_artifacts {
            Some(match &self.artifacts_dir {
                Some(dir) => dir.clone(),
                None => dirs::cache_dir()
                    .context("could not determine cache directory")?
                    .join("workpack")
                    .join("artifacts"),
            })
        } else {
            None
        };
        let options = RunOptions {
            max_workers: self.max_workers.max(1),
            conflict_policy: if self.strict_conflicts {
                ConflictPolicy::Reject
            } else {
                ConflictPolicy::MasterPrecedence
            },
            dry_run: self.dry_run,
            artifacts_dir,
            ..RunOptions::default()
        };

        let remote = Arc::new(FsRemoteStore::new(self.store.clone()));
        let base_store = BaseStore::new(master_dir.join("work-packages").join("base"));
        let orchestrator = Orchestrator::new(remote, config, master.clone(), base_store, options);

        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        let report = runtime
            .block_on(orchestrator.run())
            .with_context(|| format!("sync failed for '{master}'"))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        let failed = report.failed().count();
        if failed > 0 {
            bail!("{failed} of {} project(s) failed", report.projects.len());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Human-readable summary
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "work package")]
    key: String,
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "local")]
    local: String,
    #[tabled(rename = "pushed")]
    pushed: String,
    #[tabled(rename = "version")]
    version: String,
}

fn print_report(report: &RunReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{prefix}run {} finished in {:.1}s",
        report.run_id,
        elapsed.num_milliseconds() as f64 / 1000.0
    );

    let rows: Vec<ProjectRow> = report
        .projects
        .iter()
        .map(|p| ProjectRow {
            key: p.key.clone(),
            project: p.project.to_string(),
            status: status_label(&p.status),
            local: summary_label(&p.local_changes),
            pushed: summary_label(&p.pushed_changes),
            version: p
                .pushed_version
                .as_ref()
                .or(p.pulled_version.as_ref())
                .map_or_else(|| "-".to_string(), |v| v.0.clone()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for p in &report.projects {
        match &p.status {
            ProjectStatus::Failed { phase, reason } => {
                println!("  {} {} ({phase}): {reason}", "✗".red().bold(), p.key)
            }
            ProjectStatus::Skipped { reason } => {
                println!("  {} {}: {reason}", "-".yellow().bold(), p.key)
            }
            _ => {}
        }
    }
    if !report.conflicts.is_empty() {
        println!(
            "{} {} conflicting edit(s) resolved:",
            "!".yellow().bold(),
            report.conflicts.len()
        );
        for conflict in &report.conflicts {
            println!("  {conflict}");
        }
    }
    if report.base_committed {
        println!("{prefix}base snapshots committed");
    }
    if let Some(dir) = &report.artifacts {
        println!("artifacts kept in {}", dir.display());
    }
}

fn status_label(status: &ProjectStatus) -> String {
    match status {
        ProjectStatus::Synced => "SYNCED".green().bold().to_string(),
        ProjectStatus::SkippedLocked => "SKIPPED (locked)".yellow().bold().to_string(),
        ProjectStatus::Skipped { .. } => "SKIPPED".yellow().bold().to_string(),
        ProjectStatus::Failed { .. } => "FAILED".red().bold().to_string(),
    }
}

fn summary_label(summary: &ChangeSummary) -> String {
    if summary.total() == 0 {
        return "-".to_string();
    }
    format!("+{} ~{} -{}", summary.inserted, summary.updated, summary.deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_label_shows_counts() {
        let summary = ChangeSummary {
            inserted: 2,
            updated: 1,
            deleted: 0,
        };
        assert_eq!(summary_label(&summary), "+2 ~1 -0");
        assert_eq!(summary_label(&ChangeSummary::default()), "-");
    }
}
