//! Envelope codec: the signed JSON unit exchanged with the control host.
//!
//! Every message in either direction is one envelope:
//!
//! ```text
//! { "id", "token", "timestamp", "nonce", "type", "data", "tag" }
//! ```
//!
//! `data` is the standard-base64 payload, opaque to the codec. `tag` is the
//! standard-base64 HMAC-SHA512 over
//! `id&token&timestamp&nonce&type&data`, keyed with the shared secret, so a
//! holder of the secret detects any change to the id, type or payload.
//! The tag is checked in constant time before the payload is decoded.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{self, CryptoError, Secret};

/// Largest encoded envelope accepted by [`decode`].
pub const MAX_ENVELOPE_BYTES: usize = 1 << 20;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// On-wire envelope. Field names are part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlates a request with its response. Uniqueness is the sender's job.
    pub id: String,
    pub token: String,
    /// Unix seconds at sealing time.
    pub timestamp: u64,
    pub nonce: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Standard base64 of the payload bytes.
    pub data: String,
    /// Standard base64 of the HMAC-SHA512 tag.
    pub tag: String,
}

/// A verified envelope's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub id: String,
    pub msg_type: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Seal `payload` under `secret`.
    pub fn seal(
        id: &str,
        token: &str,
        secret: &Secret,
        msg_type: &str,
        payload: &[u8],
    ) -> Result<Self, EnvelopeError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let nonce = crypto::generate_nonce()?;
        let data = STANDARD.encode(payload);
        let tag = tag_for(secret, id, token, timestamp, &nonce, msg_type, &data);

        Ok(Self {
            id: id.to_string(),
            token: token.to_string(),
            timestamp,
            nonce,
            msg_type: msg_type.to_string(),
            data,
            tag: STANDARD.encode(tag),
        })
    }

    /// Seal a serializable payload as JSON.
    pub fn seal_json<T: Serialize>(
        id: &str,
        token: &str,
        secret: &Secret,
        msg_type: &str,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        let raw = serde_json::to_vec(payload).map_err(EnvelopeError::Serialize)?;
        Self::seal(id, token, secret, msg_type, &raw)
    }

    /// Verify the token and tag, then decode the payload.
    pub fn open(self, token: &str, secret: &Secret) -> Result<Opened, EnvelopeError> {
        if self.token != token {
            return Err(EnvelopeError::TokenMismatch);
        }

        let tag = STANDARD
            .decode(&self.tag)
            .map_err(|e| EnvelopeError::Encoding("tag", e))?;
        let timestamp = self.timestamp.to_string();
        let parts = [
            self.id.as_str(),
            self.token.as_str(),
            timestamp.as_str(),
            self.nonce.as_str(),
            self.msg_type.as_str(),
            self.data.as_str(),
        ];
        if !crypto::verify(secret, &parts, &tag) {
            return Err(EnvelopeError::TagMismatch);
        }

        let payload = STANDARD
            .decode(&self.data)
            .map_err(|e| EnvelopeError::Encoding("data", e))?;

        Ok(Opened {
            id: self.id,
            msg_type: self.msg_type,
            payload,
        })
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Serialize)
    }
}

fn tag_for(
    secret: &Secret,
    id: &str,
    token: &str,
    timestamp: u64,
    nonce: &str,
    msg_type: &str,
    data: &str,
) -> [u8; crypto::TAG_LEN] {
    let timestamp = timestamp.to_string();
    crypto::sign(secret, &[id, token, &timestamp, nonce, msg_type, data])
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Seal and serialize in one step.
pub fn encode(
    id: &str,
    token: &str,
    secret: &Secret,
    msg_type: &str,
    payload: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = Envelope::seal(id, token, secret, msg_type, payload)?;
    serde_json::to_vec(&envelope).map_err(EnvelopeError::Serialize)
}

/// Parse and verify raw wire bytes.
pub fn decode(token: &str, secret: &Secret, bytes: &[u8]) -> Result<Opened, EnvelopeError> {
    if bytes.len() > MAX_ENVELOPE_BYTES {
        return Err(EnvelopeError::TooLarge(bytes.len()));
    }
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)?;
    envelope.open(token, secret)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is {0} bytes, limit is {MAX_ENVELOPE_BYTES}")]
    TooLarge(usize),

    #[error("malformed envelope: {0}")]
    Malformed(serde_json::Error),

    #[error("invalid base64 in envelope {0}: {1}")]
    Encoding(&'static str, base64::DecodeError),

    #[error("envelope token does not match session token")]
    TokenMismatch,

    #[error("envelope authentication tag mismatch")]
    TagMismatch,

    #[error("failed to serialize envelope: {0}")]
    Serialize(serde_json::Error),

    #[error(transparent)]
    Nonce(#[from] CryptoError),
}

impl EnvelopeError {
    /// True for errors caused by the bytes received rather than local failure.
    pub fn is_inbound(&self) -> bool {
        !matches!(self, Self::Serialize(_) | Self::Nonce(_))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
