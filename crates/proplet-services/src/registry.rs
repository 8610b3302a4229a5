//! The task registry: the single task this device is currently managing.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    /// Registered, waiting for its binary (registry fetch in flight).
    Starting,
    Running,
    /// Stop requested, engine not yet confirmed.
    Stopping,
}

impl TaskState {
    /// Starting or running: the engine owns, or is about to own, a run.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub state: TaskState,
    pub image_url: Option<String>,
    /// The engine run currently executing this task, once launched.
    pub run: Option<RunId>,
    pub inputs: Vec<u64>,
    pub results: Vec<i64>,
    /// Unix ms when the task was registered.
    pub created_at: u64,
    /// Unix ms when the state was last changed.
    pub updated_at: u64,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, inputs: Vec<u64>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            state: TaskState::Idle,
            image_url: None,
            run: None,
            inputs,
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Holds at most one task. Owned by the control loop.
pub struct TaskRegistry {
    current: Option<Task>,
    max_results: usize,
}

impl TaskRegistry {
    pub fn new(max_results: usize) -> Self {
        Self {
            current: None,
            max_results,
        }
    }

    pub fn current(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    /// True if `task_id` names the current task.
    pub fn is_current(&self, task_id: &str) -> bool {
        self.current.as_ref().is_some_and(|t| t.id == task_id)
    }

    /// Install `task` as the current one, returning whatever it replaced.
    pub fn replace(&mut self, task: Task) -> Option<Task> {
        self.current.replace(task)
    }

    /// True if `run` is the live run of the current task `task_id`.
    pub fn is_current_run(&self, task_id: &str, run: RunId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|t| t.id == task_id && t.run == Some(run))
    }

    /// Mark `task_id` as running under `run`. No-op if it is not current.
    pub fn launched(&mut self, task_id: &str, run: RunId) -> bool {
        match self.current.as_mut() {
            Some(task) if task.id == task_id => {
                task.run = Some(run);
                task.state = TaskState::Running;
                task.updated_at = now_ms();
                true
            }
            _ => false,
        }
    }

    /// Update the state of `task_id`. No-op if it is not current.
    pub fn set_state(&mut self, task_id: &str, state: TaskState) -> bool {
        match self.current.as_mut() {
            Some(task) if task.id == task_id => {
                task.state = state;
                task.updated_at = now_ms();
                true
            }
            _ => false,
        }
    }

    /// Record results for `task_id`, capped at `max_results`, and mark it idle.
    /// No-op if it is not current.
    pub fn record_results(&mut self, task_id: &str, results: &[i64]) -> bool {
        let cap = self.max_results;
        match self.current.as_mut() {
            Some(task) if task.id == task_id => {
                task.results = results.iter().copied().take(cap).collect();
                task.state = TaskState::Idle;
                task.updated_at = now_ms();
                true
            }
            _ => false,
        }
    }
}
