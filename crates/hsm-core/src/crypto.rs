//! Cryptographic primitives for the agent.
//!
//! HMAC-SHA512 over `&`-joined canonical strings is used for both the
//! handshake signature and the envelope tag. Tags are verified in constant
//! time. Nonces come from the OS random source.
//!
//! Shared-key material lives in [`Secret`], which is wiped from memory when
//! dropped and never printed. There is no unsafe code in this module.

use std::fmt;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha512;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha512 = Hmac<Sha512>;

/// Delimiter between the fields of a canonical string.
pub const CANONICAL_DELIMITER: &str = "&";

/// Length in bytes of an HMAC-SHA512 digest.
pub const TAG_LEN: usize = 64;

/// Random bytes behind each nonce. Hex-encoded, so nonces are 32 chars.
const NONCE_BYTES: usize = 16;

// ── Secret ────────────────────────────────────────────────────────────────────

/// Shared-key material used only as an HMAC key.
///
/// Zeroized on drop. `Debug` is redacted so a secret never lands in a log
/// record by accident.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw key bytes. Callers must not persist or transmit these.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

// ── HMAC ──────────────────────────────────────────────────────────────────────

/// Join fields with the canonical delimiter.
pub fn canonical(parts: &[&str]) -> String {
    parts.join(CANONICAL_DELIMITER)
}

fn keyed(secret: &Secret, parts: &[&str]) -> HmacSha512 {
    // HMAC accepts keys of any length; this cannot fail.
    let mut mac = HmacSha512::new_from_slice(secret.expose())
        .expect("HMAC key of any length is valid");
    mac.update(canonical(parts).as_bytes());
    mac
}

/// HMAC-SHA512 of the canonical string built from `parts`.
pub fn sign(secret: &Secret, parts: &[&str]) -> [u8; TAG_LEN] {
    let digest = keyed(secret, parts).finalize().into_bytes();
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&digest);
    out
}

/// Check `tag` against the HMAC of `parts` in constant time.
pub fn verify(secret: &Secret, parts: &[&str], tag: &[u8]) -> bool {
    keyed(secret, parts).verify_slice(tag).is_ok()
}

// ── Nonces ────────────────────────────────────────────────────────────────────

/// Generate a fresh 32-character nonce from the OS random source.
///
/// Unlike a thread-local PRNG this can fail; the failure is surfaced so the
/// caller can abandon the handshake attempt.
pub fn generate_nonce() -> Result<String, CryptoError> {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(CryptoError::Random)?;
    Ok(hex::encode(bytes))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("secure random generation failed: {0}")]
    Random(rand::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
