//! Signer seam.
//!
//! The session core hands each signing request to a [`Signer`] and only
//! cares about the certificate string or the error. How the certificate is
//! produced (hardware token, PKCS#11, a helper binary) lives behind the
//! trait.

use std::io::Write;
use std::process::{Command, Stdio};

use hsm_core::message::SshRequest;
use thiserror::Error;

/// Produces signed certificates for the agent's device.
///
/// Called from a blocking thread; implementations may block.
pub trait Signer: Send + Sync {
    fn sign(&self, serial: &str, request: &SshRequest) -> Result<String, SignError>;
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("no signer configured")]
    Unavailable,

    #[error("failed to encode signing request: {0}")]
    Encode(serde_json::Error),

    #[error("failed to start signer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("signer i/o failed: {0}")]
    Io(std::io::Error),

    #[error("signer exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("signer produced no certificate")]
    EmptyOutput,
}

// ── Command signer ────────────────────────────────────────────────────────────

/// Runs an external program once per request.
///
/// Invocation: `<program> <args...> <serial>`, with the JSON-encoded
/// [`SshRequest`] on stdin. A zero exit with non-empty stdout is the
/// certificate; anything else is a [`SignError`].
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: String,
    args: Vec<String>,
}

impl CommandSigner {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Signer for CommandSigner {
    fn sign(&self, serial: &str, request: &SshRequest) -> Result<String, SignError> {
        let input = serde_json::to_vec(request).map_err(SignError::Encode)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(serial)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SignError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping stdin closes the pipe so the child sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).map_err(SignError::Io)?;
        }

        let output = child.wait_with_output().map_err(SignError::Io)?;

        if !output.status.success() {
            return Err(SignError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let certificate = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if certificate.is_empty() {
            return Err(SignError::EmptyOutput);
        }
        Ok(certificate)
    }
}

/// Stand-in when no signer is configured. Every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSigner;

impl Signer for UnavailableSigner {
    fn sign(&self, _serial: &str, _request: &SshRequest) -> Result<String, SignError> {
        Err(SignError::Unavailable)
    }
}
