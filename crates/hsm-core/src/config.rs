//! Configuration system for the agent.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HSM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hsm-agent/config.toml
//!   3. ~/.config/hsm-agent/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::Secret;
use crate::identity::SessionIdentity;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Serial of the signing device.
    pub serial: String,
    /// Agent token issued by the control host.
    pub token: String,
    /// Shared secret issued alongside the token.
    pub secret: Secret,
    /// Control host, `host[:port]`.
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Use `wss://`. Disable only for local testing.
    pub tls: bool,
    /// Bound on dial + WebSocket upgrade.
    pub handshake_timeout_secs: u64,
    /// Deadline for each frame write.
    pub write_timeout_secs: u64,
    /// Transport ping cadence.
    pub ping_interval_secs: u64,
    /// Status envelope cadence.
    pub status_interval_secs: u64,
    /// Fixed delay between session attempts.
    pub retry_delay_secs: u64,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Max inbound messages handled concurrently per session.
    pub max_handlers: usize,
    /// How long a shutting-down session waits for in-flight handlers.
    pub handler_drain_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write plain-text log lines to `path`.
    pub enabled: bool,
    pub path: PathBuf,
    /// Single rotation generation. Overwritten on each rotation.
    pub backup_path: PathBuf,
    /// Rotate before a write would take the file to this size.
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Executable that signs one request. Empty = signing unavailable.
    pub command: String,
    /// Extra arguments placed before the serial.
    pub args: Vec<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
            signer: SignerConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tls: true,
            handshake_timeout_secs: 10,
            write_timeout_secs: 10,
            ping_interval_secs: 30,
            status_interval_secs: 15,
            retry_delay_secs: 1,
            queue_capacity: 50,
            max_handlers: 16,
            handler_drain_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: data_dir().join("hsm.log"),
            backup_path: data_dir().join("hsm.log.1"),
            max_bytes: 5_000_000,
        }
    }
}

impl NetworkConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn handler_drain(&self) -> Duration {
        Duration::from_secs(self.handler_drain_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hsm-agent")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("hsm-agent")
}

fn dirs_or_home() -> PathBuf {
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
    #[error("identity.{0} is not set")]
    MissingIdentity(&'static str),
    #[error("network.{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl AgentConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, then apply env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            AgentConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HSM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&AgentConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject configs the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = &self.identity;
        if id.serial.is_empty() {
            return Err(ConfigError::MissingIdentity("serial"));
        }
        if id.token.is_empty() {
            return Err(ConfigError::MissingIdentity("token"));
        }
        if id.secret.is_empty() {
            return Err(ConfigError::MissingIdentity("secret"));
        }
        if id.host.is_empty() {
            return Err(ConfigError::MissingIdentity("host"));
        }
        if self.network.queue_capacity == 0 {
            return Err(ConfigError::ZeroLimit("queue_capacity"));
        }
        if self.network.max_handlers == 0 {
            return Err(ConfigError::ZeroLimit("max_handlers"));
        }
        Ok(())
    }

    /// The identity every session runs under.
    pub fn session_identity(&self) -> SessionIdentity {
        SessionIdentity::new(
            self.identity.serial.clone(),
            self.identity.token.clone(),
            self.identity.secret.clone(),
            self.identity.host.clone(),
        )
    }

    /// Apply HSM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HSM_IDENTITY__SERIAL") {
            self.identity.serial = v;
        }
        if let Ok(v) = std::env::var("HSM_IDENTITY__TOKEN") {
            self.identity.token = v;
        }
        if let Ok(v) = std::env::var("HSM_IDENTITY__SECRET") {
            self.identity.secret = Secret::new(v);
        }
        if let Ok(v) = std::env::var("HSM_IDENTITY__HOST") {
            self.identity.host = v;
        }
        if let Ok(v) = std::env::var("HSM_NETWORK__TLS") {
            self.network.tls = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("HSM_SIGNER__COMMAND") {
            self.signer.command = v;
        }
        if let Ok(v) = std::env::var("HSM_LOGGING__PATH") {
            self.logging.path = PathBuf::from(v);
        }
    }
}
