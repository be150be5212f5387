//! Authenticated dial to the control host.
//!
//! Every attempt signs a fresh set of `Auth-*` headers (new nonce, current
//! timestamp) and performs the WebSocket upgrade against `/hsm`. Any failure
//! here is returned to the supervisor as a parse-class error; the session
//! never retries on its own.

use std::time::SystemTime;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use hsm_core::auth::{AuthHeaders, AUTH_PATH};
use hsm_core::{AgentError, SessionIdentity};

use super::SessionSettings;

pub type HostStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `wss://<host>/hsm`, or `ws://` when TLS is disabled.
pub fn endpoint(identity: &SessionIdentity, tls: bool) -> String {
    let scheme = if tls { "wss" } else { "ws" };
    format!("{scheme}://{}{AUTH_PATH}", identity.host)
}

/// Build the upgrade request with freshly signed auth headers.
pub fn build_request(
    identity: &SessionIdentity,
    tls: bool,
    now: SystemTime,
) -> Result<Request, AgentError> {
    let headers = AuthHeaders::build(identity, now)?;

    let mut request = endpoint(identity, tls)
        .into_client_request()
        .map_err(|e| AgentError::parse("session: Invalid host endpoint", e))?;

    for (name, value) in headers.pairs() {
        let value = HeaderValue::from_str(&value)
            .map_err(|e| AgentError::parse("session: Invalid auth header", e))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// Dial and upgrade, bounded by the handshake timeout.
pub async fn connect(
    identity: &SessionIdentity,
    settings: &SessionSettings,
) -> Result<HostStream, AgentError> {
    let request = build_request(identity, settings.tls, SystemTime::now())?;
    tracing::debug!(host = %identity.host, tls = settings.tls, "dialing control host");

    let (stream, response) = timeout(settings.handshake_timeout, connect_async(request))
        .await
        .map_err(|e| AgentError::parse("session: Failed to connect to host", e))?
        .map_err(|e| AgentError::parse("session: Failed to connect to host", e))?;

    tracing::trace!(status = %response.status(), "websocket upgrade complete");
    Ok(stream)
}
