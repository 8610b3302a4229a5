//! proplet-core: shared types, message schema, topic templates, and the
//! workload cryptography. All other proplet crates depend on this one.

pub mod config;
pub mod crypto;
pub mod message;
pub mod topic;

pub use config::PropletConfig;
pub use crypto::{CryptoError, Integrity, WorkloadKey};
pub use message::{Command, MessageError, RegistryChunk, StartCommand, StopCommand};
pub use topic::{Channel, Topic};
