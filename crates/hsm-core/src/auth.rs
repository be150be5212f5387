//! Handshake authentication headers.
//!
//! The agent proves possession of the shared secret by signing
//! `token&timestamp&nonce&GET&/hsm` with HMAC-SHA512. The host recomputes
//! the same string from the four headers and compares.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::crypto::{self, CryptoError, Secret};
use crate::identity::SessionIdentity;

/// HTTP verb bound into the signature.
pub const AUTH_METHOD: &str = "GET";

/// Resource path bound into the signature; also the WebSocket endpoint.
pub const AUTH_PATH: &str = "/hsm";

pub const HEADER_TOKEN: &str = "Auth-Token";
pub const HEADER_SIGNATURE: &str = "Auth-Signature";
pub const HEADER_TIMESTAMP: &str = "Auth-Timestamp";
pub const HEADER_NONCE: &str = "Auth-Nonce";

/// The four handshake headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub token: String,
    /// Standard base64 of the HMAC-SHA512 digest.
    pub signature: String,
    /// Unix seconds at signing time.
    pub timestamp: u64,
    pub nonce: String,
}

impl AuthHeaders {
    /// Sign a fresh handshake for `identity` at `now`.
    ///
    /// Draws a new nonce on every call. Fails only if the OS random source
    /// fails; the caller decides whether to retry.
    pub fn build(identity: &SessionIdentity, now: SystemTime) -> Result<Self, AuthError> {
        let timestamp = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let nonce = crypto::generate_nonce()?;
        Ok(Self::with_nonce(&identity.token, &identity.secret, timestamp, nonce))
    }

    /// Sign with an explicit timestamp and nonce.
    pub fn with_nonce(token: &str, secret: &Secret, timestamp: u64, nonce: String) -> Self {
        let timestamp_str = timestamp.to_string();
        let digest = crypto::sign(
            secret,
            &[token, &timestamp_str, &nonce, AUTH_METHOD, AUTH_PATH],
        );
        Self {
            token: token.to_string(),
            signature: STANDARD.encode(digest),
            timestamp,
            nonce,
        }
    }

    /// Host-side check: does `signature` match the other three fields?
    pub fn verify(&self, secret: &Secret) -> bool {
        let Ok(digest) = STANDARD.decode(&self.signature) else {
            return false;
        };
        let timestamp_str = self.timestamp.to_string();
        crypto::verify(
            secret,
            &[&self.token, &timestamp_str, &self.nonce, AUTH_METHOD, AUTH_PATH],
            &digest,
        )
    }

    /// Header name/value pairs in wire order.
    pub fn pairs(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_TOKEN, self.token.clone()),
            (HEADER_SIGNATURE, self.signature.clone()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_NONCE, self.nonce.clone()),
        ]
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to generate handshake nonce: {0}")]
    Nonce(#[from] CryptoError),
}
