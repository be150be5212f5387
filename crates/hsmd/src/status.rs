//! Agent status: process-wide counters and the periodic heartbeat payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use hsm_core::message::{msg_types, StatusReport, STATUS_AVAILABLE};
use hsm_core::{Envelope, EnvelopeError, SessionIdentity};

/// Counters survive reconnects; sessions come and go, the process does not.
#[derive(Debug)]
pub struct AgentStatus {
    started: Instant,
    signed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStatus {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            signed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record_signed(&self) {
        self.signed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signed(&self) -> u64 {
        self.signed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn report(&self, serial: &str) -> StatusReport {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        StatusReport {
            serial: serial.to_string(),
            status: STATUS_AVAILABLE.to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            signed: self.signed(),
            failed: self.failed(),
            dropped: self.dropped(),
            timestamp,
        }
    }

    /// Seal a fresh status report. Each heartbeat gets its own id.
    pub fn envelope(&self, identity: &SessionIdentity) -> Result<Envelope, EnvelopeError> {
        let id = uuid::Uuid::new_v4().to_string();
        Envelope::seal_json(
            &id,
            &identity.token,
            &identity.secret,
            msg_types::STATUS,
            &self.report(&identity.serial),
        )
    }
}
