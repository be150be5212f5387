//! hsm-services: collaborators the session core calls into.
//!
//! The core only depends on the traits here: [`Signer`] for producing
//! certificates and [`DiagnosticsSink`] for structured records. Concrete
//! implementations (external command signer, tracing and rotating-file
//! sinks) are wired up by the daemon.

pub mod diagnostics;
pub mod logfile;
pub mod signer;

pub use diagnostics::{DiagnosticsSink, MemorySink, Severity, SharedSink, SinkSet, TracingSink};
pub use logfile::{FileSink, RotatingFile};
pub use signer::{CommandSigner, SignError, Signer, UnavailableSigner};
