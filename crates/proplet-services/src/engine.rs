//! Execution-engine collaborator.
//!
//! The agent hands a verified, decrypted workload to an engine and later
//! receives a [`Completion`] for it. How the engine runs the binary (child
//! process, embedded runtime) is up to the implementation.

use thiserror::Error;

/// Identifies one launch of a task. Restarting a task under the same id
/// gets a fresh run id, so a late completion from the earlier run can be
/// told apart from the live one.
pub type RunId = u64;

/// A decrypted workload ready to run.
#[derive(Clone, PartialEq, Eq)]
pub struct Workload {
    pub task_id: String,
    pub run: RunId,
    pub name: String,
    pub binary: Vec<u8>,
    pub inputs: Vec<u64>,
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("task_id", &self.task_id)
            .field("run", &self.run)
            .field("name", &self.name)
            .field("binary_len", &self.binary.len())
            .field("inputs", &self.inputs)
            .finish()
    }
}

pub trait ExecutionEngine {
    /// Begin running `workload`. Returns once the run is launched; the
    /// outcome arrives later as a [`Completion`] carrying the same run id.
    /// A run already in flight for the same task id is stopped first.
    fn start(&mut self, workload: Workload) -> Result<(), EngineError>;

    /// Terminate the run for `task_id`. Returns false if nothing was running.
    fn stop(&mut self, task_id: &str) -> bool;
}

/// Reported by the engine when a run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub task_id: String,
    pub run: RunId,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished { results: Vec<i64> },
    Failed { error: String },
    /// Killed by a stop request. Nothing is published.
    Stopped,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to stage workload: {0}")]
    Stage(#[from] std::io::Error),

    #[error("failed to launch runtime `{command}`: {reason}")]
    Launch { command: String, reason: String },
}
