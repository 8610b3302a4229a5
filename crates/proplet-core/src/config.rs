//! Configuration system for the proplet agent.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PROPLET_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/proplet/config.toml
//!   3. ~/.config/proplet/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::topic::Channel;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropletConfig {
    pub identity: IdentityConfig,
    pub channel: ChannelConfig,
    pub broker: BrokerConfig,
    pub workload: WorkloadConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Reported in discovery, heartbeat and last-will payloads.
    pub proplet_id: String,
    /// MQTT client id. Empty = use proplet_id.
    pub client_id: String,
    pub password: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub domain_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// PEM bundle for the broker's CA. Unset = plain TCP.
    pub ca_cert_path: Option<PathBuf>,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// 64 hex chars. Shared out-of-band with the control plane.
    pub key_hex: String,
    /// Ceiling on a decoded envelope, inline or reassembled.
    pub max_workload_bytes: usize,
    pub max_inputs: usize,
    pub max_results: usize,
    /// Discard an unfinished chunked transfer after this long. 0 = never.
    pub assembly_stall_timeout_secs: u64,
    pub work_dir: PathBuf,
    pub runtime_command: String,
    pub runtime_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            proplet_id: String::new(),
            client_id: String::new(),
            password: String::new(),
            namespace: "default".into(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8883,
            ca_cert_path: None,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            key_hex: String::new(),
            max_workload_bytes: 1536 * 1024,
            max_inputs: 16,
            max_results: 16,
            assembly_stall_timeout_secs: 300,
            work_dir: PathBuf::from("/tmp/proplet-workloads"),
            runtime_command: "wasmtime".into(),
            runtime_args: vec!["run".into(), "--invoke".into(), "main".into()],
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl IdentityConfig {
    pub fn client_id(&self) -> &str {
        if self.client_id.is_empty() {
            &self.proplet_id
        } else {
            &self.client_id
        }
    }
}

impl ChannelConfig {
    pub fn channel(&self) -> Channel {
        Channel::new(&self.domain_id, &self.channel_id)
    }
}

impl WorkloadConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        match self.assembly_stall_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl HeartbeatConfig {
    /// Never zero; `tokio::time::interval` panics on a zero period.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("proplet")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PropletConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse `path` if it exists, defaults otherwise. No env overrides.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(PropletConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PROPLET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&PropletConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply PROPLET_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PROPLET_IDENTITY__PROPLET_ID") {
            self.identity.proplet_id = v;
        }
        if let Some(v) = var("PROPLET_IDENTITY__CLIENT_ID") {
            self.identity.client_id = v;
        }
        if let Some(v) = var("PROPLET_IDENTITY__PASSWORD") {
            self.identity.password = v;
        }
        if let Some(v) = var("PROPLET_IDENTITY__NAMESPACE") {
            self.identity.namespace = v;
        }
        if let Some(v) = var("PROPLET_CHANNEL__DOMAIN_ID") {
            self.channel.domain_id = v;
        }
        if let Some(v) = var("PROPLET_CHANNEL__CHANNEL_ID") {
            self.channel.channel_id = v;
        }
        if let Some(v) = var("PROPLET_BROKER__HOST") {
            self.broker.host = v;
        }
        if let Some(v) = var("PROPLET_BROKER__PORT") {
            if let Ok(p) = v.parse() {
                self.broker.port = p;
            }
        }
        if let Some(v) = var("PROPLET_BROKER__CA_CERT_PATH") {
            self.broker.ca_cert_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = var("PROPLET_WORKLOAD__KEY_HEX") {
            self.workload.key_hex = v;
        }
        if let Some(v) = var("PROPLET_WORKLOAD__WORK_DIR") {
            self.workload.work_dir = PathBuf::from(v);
        }
    }
}
