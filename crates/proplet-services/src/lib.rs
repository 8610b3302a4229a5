//! proplet-services: the secure workload ingestion pipeline.
//!
//! Everything here is synchronous and single-owner. The daemon supplies a
//! [`Transport`] and an [`ExecutionEngine`]; the [`Agent`] does the rest.

pub mod agent;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod publisher;
pub mod reassembly;
pub mod registry;
pub mod router;
pub mod transport;

pub use agent::{Agent, ChunkOutcome, StartOutcome, StopOutcome};
pub use engine::{Completion, EngineError, ExecutionEngine, Outcome, RunId, Workload};
pub use error::IngestError;
pub use publisher::{ControlPublisher, Outbound};
pub use reassembly::{ChunkReassembler, ReassemblyError};
pub use registry::{Task, TaskRegistry, TaskState};
pub use router::{Route, Router};
pub use transport::{Transport, TransportError};
