//! Payload schemas carried inside envelopes.
//!
//! The envelope `type` field selects one of these. Receivers dispatch on the
//! type string and deserialize `data` accordingly; unknown types are ignored.

use serde::{Deserialize, Serialize};

/// Well-known envelope `type` strings.
pub mod msg_types {
    /// Host → agent: sign an SSH certificate. Agent → host: the result.
    pub const SSH_CERTIFICATE: &str = "ssh_certificate";
    /// Agent → host heartbeat. Never sent by the host.
    pub const STATUS: &str = "status";
}

/// Signing request pushed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshRequest {
    /// Device serial the host expects to sign with.
    #[serde(default)]
    pub serial: String,
    /// Unsigned certificate material, as the host encoded it.
    pub certificate: String,
}

/// Signed artifact returned to the host, correlated by envelope id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshResponse {
    pub certificate: String,
}

/// Agent health reported on every status tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub serial: String,
    /// Always `"available"` while the agent is connected.
    pub status: String,
    pub uptime_secs: u64,
    /// Certificates signed since process start.
    pub signed: u64,
    /// Signing attempts that failed since process start.
    pub failed: u64,
    /// Inbound messages dropped (bad envelope or payload) since process start.
    pub dropped: u64,
    /// Unix seconds when this report was built.
    pub timestamp: u64,
}

pub const STATUS_AVAILABLE: &str = "available";
