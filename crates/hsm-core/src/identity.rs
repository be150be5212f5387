//! Session identity: who the agent is to the control host.

use crate::crypto::Secret;

/// Credentials and target for one agent.
///
/// Read-only after construction; sessions share it behind an `Arc`.
/// `secret` is only ever used as an HMAC key and is never sent on the wire.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Serial of the signing device this agent fronts.
    pub serial: String,
    /// Public token identifying the agent to the host.
    pub token: String,
    pub secret: Secret,
    /// Control host, `host[:port]`, no scheme.
    pub host: String,
}

impl SessionIdentity {
    pub fn new(
        serial: impl Into<String>,
        token: impl Into<String>,
        secret: Secret,
        host: impl Into<String>,
    ) -> Self {
        Self {
            serial: serial.into(),
            token: token.into(),
            secret,
            host: host.into(),
        }
    }
}
