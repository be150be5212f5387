//! hsmd: HSM signing agent.
//!
//! Holds one authenticated WebSocket session to the control host, signs
//! certificate requests pushed over it and reports status on a timer. The
//! supervisor reopens the session whenever it fails.

pub mod dispatch;
pub mod session;
pub mod status;
pub mod supervisor;

pub use dispatch::{DispatchError, RequestDispatcher};
pub use session::{SessionSettings, SessionState, StreamSession};
pub use status::AgentStatus;
pub use supervisor::{supervise, Supervisor};
