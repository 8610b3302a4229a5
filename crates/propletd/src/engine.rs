//! Process engine: runs each workload through the configured runtime CLI.
//!
//! The decrypted binary is staged to `work_dir/<task_id>-<run>.wasm`, the
//! runtime is spawned as a child process, and a supervisor task waits for it.
//! The supervisor kills the child on a stop request, removes the staged file,
//! and reports a `Completion` to the control loop. Each run stages its own
//! file, so a run being torn down never touches its replacement's binary.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use proplet_core::config::WorkloadConfig;
use proplet_services::{Completion, EngineError, ExecutionEngine, Outcome, RunId, Workload};

pub struct ProcessEngine {
    work_dir: PathBuf,
    command: String,
    args: Vec<String>,
    max_results: usize,
    completions: mpsc::UnboundedSender<Completion>,
    running: HashMap<String, RunningWorkload>,
}

struct RunningWorkload {
    run: RunId,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProcessEngine {
    pub fn new(settings: &WorkloadConfig, completions: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            work_dir: settings.work_dir.clone(),
            command: settings.runtime_command.clone(),
            args: settings.runtime_args.clone(),
            max_results: settings.max_results,
            completions,
            running: HashMap::new(),
        }
    }

    /// Kill every run still in flight.
    pub fn shutdown(&mut self) {
        for (task_id, running) in self.running.drain() {
            if !running.handle.is_finished() {
                tracing::info!(
                    task_id = %task_id,
                    run = running.run,
                    "killing workload on shutdown"
                );
                let _ = running.cancel.send(());
            }
        }
    }

    fn prune(&mut self) {
        self.running.retain(|_, running| !running.handle.is_finished());
    }
}

impl ExecutionEngine for ProcessEngine {
    fn start(&mut self, workload: Workload) -> Result<(), EngineError> {
        self.prune();
        if self.running.contains_key(&workload.task_id) {
            self.stop(&workload.task_id);
        }

        let path = stage(&self.work_dir, &workload)?;
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(&path)
            .args(workload.inputs.iter().map(u64::to_string))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(EngineError::Launch {
                    command: self.command.clone(),
                    reason: e.to_string(),
                });
            }
        };

        tracing::info!(
            task_id = %workload.task_id,
            run = workload.run,
            name = %workload.name,
            path = %path.display(),
            pid = ?child.id(),
            "runtime spawned"
        );

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(supervise(
            workload.task_id.clone(),
            workload.run,
            child,
            path,
            cancel_rx,
            self.max_results,
            self.completions.clone(),
        ));
        self.running.insert(
            workload.task_id,
            RunningWorkload {
                run: workload.run,
                cancel: cancel_tx,
                handle,
            },
        );
        Ok(())
    }

    fn stop(&mut self, task_id: &str) -> bool {
        self.prune();
        match self.running.remove(task_id) {
            Some(running) => running.cancel.send(()).is_ok(),
            None => false,
        }
    }
}

async fn supervise(
    task_id: String,
    run: RunId,
    child: Child,
    path: PathBuf,
    cancel: oneshot::Receiver<()>,
    max_results: usize,
    completions: mpsc::UnboundedSender<Completion>,
) {
    let outcome = tokio::select! {
        output = child.wait_with_output() => match output {
            Ok(output) if output.status.success() => Outcome::Finished {
                results: parse_results(&String::from_utf8_lossy(&output.stdout), max_results),
            },
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Outcome::Failed {
                    error: format!("runtime exited with {}: {}", output.status, stderr.trim()),
                }
            }
            Err(e) => Outcome::Failed {
                error: format!("failed to wait for runtime: {e}"),
            },
        },
        // Dropping the child future kills the process.
        _ = cancel => Outcome::Stopped,
    };

    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove staged workload");
    }
    let completion = Completion {
        task_id,
        run,
        outcome,
    };
    if completions.send(completion).is_err() {
        tracing::debug!("control loop gone, completion dropped");
    }
}

/// Write the binary where the runtime can read it, owner-only.
fn stage(work_dir: &Path, workload: &Workload) -> Result<PathBuf, EngineError> {
    std::fs::create_dir_all(work_dir)?;
    let path = work_dir.join(format!("{}-{}.wasm", file_stem(&workload.task_id), workload.run));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&path)?;
    file.write_all(&workload.binary)?;
    file.sync_all()?;
    Ok(path)
}

/// Task ids come from the network; keep them to a safe file name.
fn file_stem(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Integers printed by the runtime, separated by whitespace or commas.
fn parse_results(stdout: &str, max: usize) -> Vec<i64> {
    stdout
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|token| token.parse().ok())
        .take(max)
        .collect()
}
