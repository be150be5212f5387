//! hsm-core: identity, wire envelope, handshake signing and configuration.
//! All other agent crates depend on this one.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod message;

pub use auth::AuthHeaders;
pub use crypto::Secret;
pub use envelope::{Envelope, EnvelopeError, Opened};
pub use error::{AgentError, ErrorKind};
pub use identity::SessionIdentity;
