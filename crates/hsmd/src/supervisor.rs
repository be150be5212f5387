//! Connection supervisor: keeps a session alive for the life of the process.
//!
//! Every session failure is logged and followed by a fixed delay before the
//! next dial. There is no attempt cap and no backoff growth. A shutdown
//! signal ends the loop after the current session closes.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::TryRecvError};

use hsm_core::AgentError;
use hsm_services::{DiagnosticsSink, SharedSink};

use crate::session::StreamSession;

pub struct Supervisor {
    session: StreamSession,
    retry_delay: Duration,
    sink: SharedSink,
}

impl Supervisor {
    pub fn new(session: StreamSession, retry_delay: Duration, sink: SharedSink) -> Self {
        Self { session, retry_delay, sink }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Returns only once `shutdown` fires. Returns the number of sessions run.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> u64 {
        let session = &self.session;
        supervise(move |rx| session.run(rx), self.retry_delay, self.sink.as_ref(), shutdown).await
    }
}

/// Run `attempt` repeatedly, sleeping `delay` after each one.
///
/// Each attempt gets its own subscription to `shutdown` so it can close
/// gracefully. If the sender side is dropped the loop runs forever.
pub async fn supervise<F, Fut>(
    mut attempt: F,
    delay: Duration,
    sink: &dyn DiagnosticsSink,
    mut shutdown: broadcast::Receiver<()>,
) -> u64
where
    F: FnMut(broadcast::Receiver<()>) -> Fut,
    Fut: Future<Output = Result<(), AgentError>>,
{
    let mut attempts = 0u64;
    loop {
        if stop_requested(&mut shutdown) {
            break;
        }
        attempts += 1;

        match attempt(shutdown.resubscribe()).await {
            Ok(()) => tracing::info!(attempt = attempts, "session closed"),
            Err(e) => sink.error(
                &[("error", e.to_string()), ("attempt", attempts.to_string())],
                "supervisor: Session stream error",
            ),
        }

        if stop_requested(&mut shutdown) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Ok(()) = shutdown.recv() => break,
        }
    }
    tracing::info!(attempts, "supervisor stopped");
    attempts
}

fn stop_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Ok(()) | Err(TryRecvError::Lagged(_)))
}
