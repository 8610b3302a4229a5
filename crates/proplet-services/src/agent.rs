//! The agent: one context object owning every piece of ingestion state.
//!
//! The control loop owns a single [`Agent`] and feeds it inbound publishes,
//! engine completions and heartbeat ticks, one at a time. The task registry,
//! the reassembly buffer and the workload key live here and nowhere else, so
//! no handler needs a lock.

use std::time::{Duration, Instant};

use proplet_core::config::WorkloadConfig;
use proplet_core::{Command, PropletConfig, RegistryChunk, StartCommand, StopCommand, WorkloadKey};

use crate::engine::{Completion, ExecutionEngine, Outcome, RunId, Workload};
use crate::error::IngestError;
use crate::pipeline;
use crate::publisher::ControlPublisher;
use crate::reassembly::{ChunkReassembler, Progress};
use crate::registry::{Task, TaskRegistry, TaskState};
use crate::router::{Route, Router};
use crate::transport::{Transport, TransportError};

/// Size and count bounds applied to untrusted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_workload_bytes: usize,
    pub max_inputs: usize,
    pub max_results: usize,
    pub stall_timeout: Option<Duration>,
}

impl Limits {
    pub fn from_config(workload: &WorkloadConfig) -> Self {
        Self {
            max_workload_bytes: workload.max_workload_bytes,
            max_inputs: workload.max_inputs,
            max_results: workload.max_results,
            stall_timeout: workload.stall_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Inline binary verified, decrypted and handed to the engine.
    Launched,
    /// Registry fetch requested; the binary will arrive as chunks.
    AwaitingRegistry,
    /// Neither an inline binary nor an image reference.
    NothingToRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The id did not match the current task.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Pending { received: u32, total: u32 },
    Launched,
    /// Transfer verified, but there is no task record to run it under.
    Unbound,
}

pub struct Agent<T, E> {
    key: WorkloadKey,
    limits: Limits,
    registry: TaskRegistry,
    reassembler: ChunkReassembler,
    publisher: ControlPublisher<T>,
    engine: E,
    router: Router,
    /// Last run id handed to the engine.
    last_run: RunId,
}

impl<T: Transport, E: ExecutionEngine> Agent<T, E> {
    pub fn new(config: &PropletConfig, key: WorkloadKey, transport: T, engine: E) -> Self {
        let channel = config.channel.channel();
        let limits = Limits::from_config(&config.workload);
        Self {
            key,
            registry: TaskRegistry::new(limits.max_results),
            reassembler: ChunkReassembler::new(limits.max_workload_bytes),
            router: Router::new(&channel),
            publisher: ControlPublisher::new(
                transport,
                channel,
                config.identity.proplet_id.clone(),
                config.identity.namespace.clone(),
            ),
            engine,
            limits,
            last_run: 0,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn reassembler(&self) -> &ChunkReassembler {
        &self.reassembler
    }

    pub fn publisher(&self) -> &ControlPublisher<T> {
        &self.publisher
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Dispatch one inbound publish to its handler. The payload is decoded
    /// into a typed command first; handler errors are logged here and go no
    /// further. Returns the route taken, if any.
    pub fn route(&mut self, topic: &str, payload: &[u8]) -> Option<Route> {
        let Some(route) = self.router.classify(topic) else {
            tracing::warn!(topic, "no handler for topic, dropping message");
            return None;
        };

        let result = Command::decode(route.topic(), payload)
            .map_err(IngestError::from)
            .and_then(|command| self.dispatch(command, Instant::now()));

        if let Err(e) = result {
            if e.is_integrity_failure() {
                tracing::error!(route = ?route, kind = e.kind(), error = %e, "workload rejected");
            } else {
                tracing::warn!(route = ?route, kind = e.kind(), error = %e, "message dropped");
            }
        }
        Some(route)
    }

    fn dispatch(&mut self, command: Command, now: Instant) -> Result<(), IngestError> {
        match command {
            Command::Start(cmd) => {
                let outcome = self.start(cmd)?;
                tracing::debug!(?outcome, "start handled");
            }
            Command::Stop(cmd) => {
                let outcome = self.stop(cmd);
                tracing::debug!(?outcome, "stop handled");
            }
            Command::RegistryChunk(chunk) => {
                let outcome = self.registry_chunk(&chunk, now)?;
                tracing::debug!(?outcome, "registry chunk handled");
            }
        }
        Ok(())
    }

    /// Register `cmd` as the current task and run or fetch its binary.
    ///
    /// An inline binary is fully ingested before the registry is touched: if
    /// decoding, verification or decryption fails, the previous task and its
    /// run are left alone.
    pub fn start(&mut self, cmd: StartCommand) -> Result<StartOutcome, IngestError> {
        let (inputs, truncated) = cmd.bounded_inputs(self.limits.max_inputs);
        if truncated {
            tracing::warn!(
                task_id = %cmd.id,
                max_inputs = self.limits.max_inputs,
                "too many inputs, extra values dropped"
            );
        }
        tracing::info!(task_id = %cmd.id, name = %cmd.name, "start command");

        if let Some(file) = cmd.inline_file() {
            let envelope = pipeline::decode_inline(file, self.limits.max_workload_bytes)?;
            let binary = pipeline::open_envelope(&envelope, cmd.checksum(), &self.key)?;
            drop(envelope);
            self.install(Task::new(cmd.id, cmd.name, inputs));
            self.launch(binary)?;
            return Ok(StartOutcome::Launched);
        }

        if let Some(image_url) = cmd.image_url() {
            let image_url = image_url.to_string();
            let mut task = Task::new(cmd.id, cmd.name, inputs);
            task.image_url = Some(image_url.clone());
            task.state = TaskState::Starting;
            let task_id = task.id.clone();
            self.install(task);
            self.publisher.registry_fetch(&image_url)?;
            tracing::info!(task_id = %task_id, image_url = %image_url, "requested workload from registry");
            return Ok(StartOutcome::AwaitingRegistry);
        }

        let task_id = cmd.id.clone();
        self.install(Task::new(cmd.id, cmd.name, inputs));
        tracing::warn!(task_id = %task_id, "start command has no file or image_url, nothing to run");
        Ok(StartOutcome::NothingToRun)
    }

    /// Stop the current task if `cmd` names it. Anything else is a no-op.
    pub fn stop(&mut self, cmd: StopCommand) -> StopOutcome {
        if !self.registry.is_current(&cmd.id) {
            tracing::info!(
                task_id = %cmd.id,
                current = self.registry.current().map(|t| t.id.as_str()).unwrap_or("<none>"),
                "stop for a task that is not current, ignoring"
            );
            return StopOutcome::Ignored;
        }

        let was_running = self.engine.stop(&cmd.id);
        if was_running {
            self.registry.set_state(&cmd.id, TaskState::Stopping);
        } else if self
            .registry
            .current()
            .is_some_and(|t| t.state == TaskState::Starting)
        {
            // Nothing launched yet, so no completion will clear the state.
            self.registry.set_state(&cmd.id, TaskState::Idle);
        }
        // A task waiting on the registry must not launch from this transfer.
        self.reassembler.reset();
        tracing::info!(task_id = %cmd.id, was_running, "task stopped");
        StopOutcome::Stopped
    }

    /// Feed one registry chunk. On the final chunk the envelope is verified
    /// and decrypted, launched as the current task, then acknowledged.
    pub fn registry_chunk(
        &mut self,
        chunk: &RegistryChunk,
        now: Instant,
    ) -> Result<ChunkOutcome, IngestError> {
        let envelope = match self.reassembler.accept(chunk, now)? {
            Progress::Pending { received, total } => {
                return Ok(ChunkOutcome::Pending { received, total })
            }
            Progress::Complete(envelope) => envelope,
        };
        tracing::info!(len = envelope.bytes.len(), chunks = envelope.chunks, "transfer complete");

        let binary =
            pipeline::open_envelope(&envelope.bytes, &envelope.expected_digest, &self.key)?;
        drop(envelope);

        let Some(task_id) = self.registry.current().map(|t| t.id.clone()) else {
            tracing::warn!(len = binary.len(), "no task to run the received workload, discarding");
            return Ok(ChunkOutcome::Unbound);
        };

        self.launch(binary)?;
        if let Err(e) = self.publisher.registry_ack(&task_id) {
            tracing::warn!(task_id = %task_id, error = %e, "failed to publish registry ack");
        }
        Ok(ChunkOutcome::Launched)
    }

    // ── Engine ────────────────────────────────────────────────────────────────

    /// Record a finished run and publish its results. Completions from a run
    /// that has since been replaced are dropped.
    pub fn complete(&mut self, completion: Completion) -> Result<(), TransportError> {
        let Completion {
            task_id,
            run,
            outcome,
        } = completion;
        if !self.registry.is_current_run(&task_id, run) {
            tracing::debug!(task_id = %task_id, run, "completion from a superseded run, ignoring");
            return Ok(());
        }

        match outcome {
            Outcome::Finished { results } => {
                let results: Vec<i64> = results.into_iter().take(self.limits.max_results).collect();
                self.registry.record_results(&task_id, &results);
                tracing::info!(task_id = %task_id, run, ?results, "workload finished");
                self.publisher.results(&task_id, results, None)
            }
            Outcome::Failed { error } => {
                self.registry.set_state(&task_id, TaskState::Idle);
                tracing::warn!(task_id = %task_id, run, error = %error, "workload failed");
                self.publisher.results(&task_id, Vec::new(), Some(error))
            }
            Outcome::Stopped => {
                self.registry.set_state(&task_id, TaskState::Idle);
                tracing::info!(task_id = %task_id, run, "workload terminated");
                Ok(())
            }
        }
    }

    // ── Periodic ──────────────────────────────────────────────────────────────

    /// Announce this device after (re)connecting.
    pub fn announce(&self) -> Result<(), TransportError> {
        self.publisher.discovery()?;
        tracing::info!("discovery published");
        Ok(())
    }

    /// Heartbeat tick: expire a stalled transfer, then report liveness.
    pub fn heartbeat(&mut self, now: Instant) -> Result<(), TransportError> {
        self.reassembler.expire_stalled(now, self.limits.stall_timeout);
        self.publisher.alive()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Make `task` current, stopping the run it replaces. This includes an
    /// earlier run of the same task id.
    fn install(&mut self, task: Task) {
        let task_id = task.id.clone();
        let Some(previous) = self.registry.replace(task) else {
            return;
        };
        if previous.state.is_active() {
            let was_running = self.engine.stop(&previous.id);
            tracing::info!(
                task_id = %task_id,
                preempted = %previous.id,
                was_running,
                "preempting previous task"
            );
        }
        self.reassembler.reset();
    }

    /// Hand `binary` to the engine as a new run of the current task.
    fn launch(&mut self, binary: Vec<u8>) -> Result<(), IngestError> {
        let Some(task) = self.registry.current() else {
            return Ok(());
        };
        self.last_run = self.last_run.wrapping_add(1);
        let workload = Workload {
            task_id: task.id.clone(),
            run: self.last_run,
            name: task.name.clone(),
            binary,
            inputs: task.inputs.clone(),
        };
        let task_id = workload.task_id.clone();
        let run = workload.run;
        let len = workload.binary.len();

        match self.engine.start(workload) {
            Ok(()) => {
                self.registry.launched(&task_id, run);
                tracing::info!(task_id = %task_id, run, len, "workload launched");
                Ok(())
            }
            Err(e) => {
                self.registry.set_state(&task_id, TaskState::Idle);
                Err(e.into())
            }
        }
    }
}
