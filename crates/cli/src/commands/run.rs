//! Run Command
//!
//! Coordinator for parallel runs: spawns one process per worker with
//! `APISCOPE_WORKER=gw<i>`, waits for all of them, then merges their trace
//! files. Ctrl-C is forwarded to the workers as SIGTERM.

use anyhow::{bail, Context, Result};
use apiscope_harness::ReportAggregator;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::aggregate::{aggregate, AggregateArgs};
use crate::output::{print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of worker processes
    #[arg(short = 'n', long, default_value = "2", value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Reports directory shared by all workers
    #[arg(long, env = "APISCOPE_REPORTS_DIR", default_value = "reports")]
    pub reports_dir: PathBuf,

    /// Skip the HTML report
    #[arg(long)]
    pub no_html: bool,

    /// Delete worker files after merging
    #[arg(long)]
    pub clean: bool,

    /// Command each worker runs
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Worker id for index `i`
pub fn worker_id(i: u16) -> String {
    format!("gw{}", i)
}

#[derive(Debug, Serialize)]
pub struct WorkerOutcome {
    pub worker: String,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl WorkerOutcome {
    fn new(worker: String, pid: Option<u32>, status: std::io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                worker,
                pid,
                exit_code: status.code(),
                success: status.success(),
            },
            Err(e) => {
                warn!("Failed to wait for worker {}: {}", worker, e);
                Self {
                    worker,
                    pid,
                    exit_code: None,
                    success: false,
                }
            }
        }
    }
}

impl TableDisplay for WorkerOutcome {
    fn headers() -> Vec<&'static str> {
        vec!["Worker", "PID", "Exit", "Result"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.worker.clone(),
            self.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into()),
            if self.success {
                "passed".green().to_string()
            } else {
                "failed".red().to_string()
            },
        ]
    }
}

/// Remove worker files left over from an earlier run
fn clear_stale_worker_files(reports_dir: &Path) {
    let aggregator = ReportAggregator::new(reports_dir).with_worker_id(None);
    for file in aggregator.worker_files() {
        match std::fs::remove_file(&file) {
            Ok(()) => info!("Removed stale worker file {}", file.display()),
            Err(e) => warn!("Failed to remove stale worker file {}: {}", file.display(), e),
        }
    }
}

#[cfg(unix)]
fn forward_sigterm(pids: &[(String, u32)]) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    for (worker, pid) in pids {
        if let Err(e) = kill(Pid::from_raw(*pid as i32), Signal::SIGTERM) {
            warn!("Failed to signal worker {} (pid {}): {}", worker, pid, e);
        }
    }
}

#[cfg(not(unix))]
fn forward_sigterm(_pids: &[(String, u32)]) {}

fn worker_command(args: &RunArgs, id: &str) -> Command {
    let mut cmd = Command::new(&args.command[0]);
    cmd.args(&args.command[1..])
        .env("APISCOPE_WORKER", id)
        .env("APISCOPE_WORKER_COUNT", args.workers.to_string())
        .env("APISCOPE_REPORTS_DIR", &args.reports_dir)
        .kill_on_drop(true);
    cmd
}

/// Spawn every worker and wait for all of them
pub async fn run_workers(args: &RunArgs) -> Result<Vec<WorkerOutcome>> {
    let mut waits = JoinSet::new();
    let mut pids = Vec::new();

    for i in 0..args.workers {
        let id = worker_id(i);
        let mut child = worker_command(args, &id)
            .spawn()
            .with_context(|| format!("Failed to spawn worker {}: {}", id, args.command.join(" ")))?;
        let pid = child.id();
        info!("Started worker {} (pid {:?})", id, pid);
        if let Some(pid) = pid {
            pids.push((id.clone(), pid));
        }
        waits.spawn(async move {
            let status = child.wait().await;
            WorkerOutcome::new(id, pid, status)
        });
    }

    let mut outcomes = Vec::new();
    let mut interrupted = false;
    loop {
        tokio::select! {
            joined = waits.join_next() => match joined {
                Some(Ok(outcome)) => {
                    info!("Worker {} finished (exit {:?})", outcome.worker, outcome.exit_code);
                    outcomes.push(outcome);
                }
                Some(Err(e)) => warn!("Worker wait task failed: {}", e),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                print_warning("Interrupted, stopping workers");
                forward_sigterm(&pids);
            }
        }
    }

    outcomes.sort_by(|a, b| a.worker.cmp(&b.worker));
    Ok(outcomes)
}

pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<()> {
    clear_stale_worker_files(&args.reports_dir);

    let outcomes = run_workers(&args).await?;
    print_list(&outcomes, format);

    let aggregate_args = AggregateArgs {
        reports_dir: args.reports_dir.clone(),
        no_html: args.no_html,
        clean: args.clean,
    };
    aggregate(&aggregate_args, format)?;

    let failed = outcomes.iter().filter(|o| !o.success).count();
    if failed > 0 {
        bail!("{} of {} workers failed", failed, outcomes.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &Path, workers: u16, command: &[&str]) -> RunArgs {
        RunArgs {
            workers,
            reports_dir: dir.to_path_buf(),
            no_html: true,
            clean: false,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_worker_ids() {
        assert_eq!(worker_id(0), "gw0");
        assert_eq!(worker_id(11), "gw11");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_workers_get_their_own_id() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"mkdir -p "$APISCOPE_REPORTS_DIR/ids" && echo "$APISCOPE_WORKER" > "$APISCOPE_REPORTS_DIR/ids/$APISCOPE_WORKER""#;
        let outcomes = run_workers(&args(dir.path(), 3, &["sh", "-c", script])).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.success));
        for id in ["gw0", "gw1", "gw2"] {
            let written = std::fs::read_to_string(dir.path().join("ids").join(id)).unwrap();
            assert_eq!(written.trim(), id);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_worker_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"[ "$APISCOPE_WORKER" = "gw1" ] && exit 3; exit 0"#;
        let outcomes = run_workers(&args(dir.path(), 2, &["sh", "-c", script])).await.unwrap();

        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_workers(&args(dir.path(), 1, &["apiscope-no-such-binary"])).await;
        assert!(result.is_err());
    }
}
