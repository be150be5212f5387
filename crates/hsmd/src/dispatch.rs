//! Request dispatch: routes an opened envelope to the handler for its type.
//!
//! Only `ssh_certificate` produces a response. Everything else, including
//! `status` echoed back by the host, is ignored without error.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;

use hsm_core::message::{msg_types, SshRequest, SshResponse};
use hsm_core::{Envelope, EnvelopeError, Opened, SessionIdentity};
use hsm_services::{SignError, Signer};

use crate::status::AgentStatus;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to unmarshal payload data: {0}")]
    Payload(serde_json::Error),

    #[error("sign payload error: {0}")]
    Sign(SignError),

    #[error("signer panicked: {0}")]
    SignerFault(String),

    #[error("failed to seal response: {0}")]
    Envelope(EnvelopeError),
}

impl DispatchError {
    /// The request never reached the signer.
    pub fn is_malformed(&self) -> bool {
        matches!(self, DispatchError::Payload(_))
    }
}

pub struct RequestDispatcher {
    identity: Arc<SessionIdentity>,
    signer: Arc<dyn Signer>,
    status: Arc<AgentStatus>,
}

impl RequestDispatcher {
    pub fn new(
        identity: Arc<SessionIdentity>,
        signer: Arc<dyn Signer>,
        status: Arc<AgentStatus>,
    ) -> Self {
        Self { identity, signer, status }
    }

    /// Handle one authenticated message. `Ok(None)` means nothing to send back.
    pub async fn dispatch(&self, opened: Opened) -> Result<Option<Envelope>, DispatchError> {
        match opened.msg_type.as_str() {
            msg_types::SSH_CERTIFICATE if opened.payload.is_empty() => {
                tracing::debug!(id = %opened.id, "empty signing request ignored");
                Ok(None)
            }
            msg_types::SSH_CERTIFICATE => self.sign_certificate(&opened.id, &opened.payload).await.map(Some),
            other => {
                tracing::debug!(id = %opened.id, msg_type = other, "ignoring message type");
                Ok(None)
            }
        }
    }

    async fn sign_certificate(&self, id: &str, payload: &[u8]) -> Result<Envelope, DispatchError> {
        let request: SshRequest = serde_json::from_slice(payload).map_err(DispatchError::Payload)?;
        if !request.serial.is_empty() && request.serial != self.identity.serial {
            tracing::warn!(
                id,
                requested = %request.serial,
                serial = %self.identity.serial,
                "signing request names a different serial"
            );
        }

        let signer = Arc::clone(&self.signer);
        let serial = self.identity.serial.clone();
        let outcome = tokio::task::spawn_blocking(move || signer.sign(&serial, &request)).await;

        let certificate = match outcome {
            Ok(Ok(certificate)) => certificate,
            Ok(Err(e)) => {
                self.status.record_failure();
                return Err(DispatchError::Sign(e));
            }
            Err(e) => {
                self.status.record_failure();
                return Err(DispatchError::SignerFault(join_message(e)));
            }
        };
        self.status.record_signed();
        tracing::info!(id, "certificate signed");

        Envelope::seal_json(
            id,
            &self.identity.token,
            &self.identity.secret,
            msg_types::SSH_CERTIFICATE,
            &SshResponse { certificate },
        )
        .map_err(DispatchError::Envelope)
    }
}

fn join_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
