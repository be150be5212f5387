//! Error taxonomy shared by every component.
//!
//! Three classes: failure to observe state (`Read`), failure to persist or
//! transmit (`Write`), and malformed or unauthenticated data (`Parse`).
//! Module-specific errors fold into [`AgentError`] so the supervisor can log
//! one type without classifying further.

use thiserror::Error;

use crate::auth::AuthError;
use crate::envelope::EnvelopeError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Read,
    Write,
    Parse,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{context}: {source}")]
    Read {
        context: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{context}: {source}")]
    Write {
        context: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{context}: {source}")]
    Parse {
        context: &'static str,
        #[source]
        source: BoxError,
    },
}

impl AgentError {
    pub fn read(context: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Read { context, source: source.into() }
    }

    pub fn write(context: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Write { context, source: source.into() }
    }

    pub fn parse(context: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Parse { context, source: source.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Read { .. } => ErrorKind::Read,
            Self::Write { .. } => ErrorKind::Write,
            Self::Parse { .. } => ErrorKind::Parse,
        }
    }
}

impl From<EnvelopeError> for AgentError {
    fn from(e: EnvelopeError) -> Self {
        if e.is_inbound() {
            Self::parse("envelope rejected", e)
        } else {
            Self::write("failed to build envelope", e)
        }
    }
}

impl From<AuthError> for AgentError {
    fn from(e: AuthError) -> Self {
        Self::parse("failed to sign handshake", e)
    }
}
