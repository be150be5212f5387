//! Stream session: one authenticated WebSocket connection to the control
//! host, from dial to teardown.

pub mod handshake;
pub mod queue;
mod stream;

pub use queue::{outbound_queue, OutboundQueue, OutboundReceiver, QueueClosed};
pub use stream::StreamSession;

use std::time::Duration;

use hsm_core::config::NetworkConfig;

/// Lifecycle of a single session. Nothing carries over to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Timings and limits for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// `wss://` when true, `ws://` otherwise.
    pub tls: bool,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
    pub status_interval: Duration,
    pub queue_capacity: usize,
    pub max_handlers: usize,
    pub handler_drain: Duration,
}

impl From<&NetworkConfig> for SessionSettings {
    fn from(net: &NetworkConfig) -> Self {
        Self {
            tls: net.tls,
            handshake_timeout: net.handshake_timeout(),
            write_timeout: net.write_timeout(),
            ping_interval: net.ping_interval(),
            status_interval: net.status_interval(),
            queue_capacity: net.queue_capacity.max(1),
            max_handlers: net.max_handlers.max(1),
            handler_drain: net.handler_drain(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}
