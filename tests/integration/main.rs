//! hsmd integration test harness.
//!
//! Each test starts an in-process mock control host on a loopback port and
//! points a real supervisor at it over plain `ws://`. The host checks the
//! signed `Auth-*` headers during the upgrade, then speaks sealed envelopes.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use hsm_core::auth::{AuthHeaders, AUTH_PATH, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, HEADER_TOKEN};
use hsm_core::envelope;
use hsm_core::message::{msg_types, SshRequest};
use hsm_core::{Envelope, Opened, Secret, SessionIdentity};
use hsm_services::{MemorySink, SharedSink, SignError, Signer};
use hsmd::{AgentStatus, RequestDispatcher, SessionSettings, StreamSession, Supervisor};

mod failures;
mod recovery;
mod sessions;
mod status;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SERIAL: &str = "0001";
pub const TOKEN: &str = "agent-token";
pub const SECRET: &str = "agent-secret";

/// How long any single wait in a test may take.
pub const WAIT: Duration = Duration::from_secs(10);

/// One accepted, authenticated agent connection.
pub struct HostConn {
    pub ws: WebSocketStream<TcpStream>,
    pub auth: AuthHeaders,
}

impl HostConn {
    pub async fn send_sign_request(&mut self, id: &str, certificate: &str) -> Result<()> {
        let env = Envelope::seal_json(
            id,
            TOKEN,
            &Secret::new(SECRET),
            msg_types::SSH_CERTIFICATE,
            &SshRequest { serial: SERIAL.into(), certificate: certificate.into() },
        )?;
        self.send_raw(&env.to_json()?).await
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Next sealed envelope from the agent. Control frames are skipped.
    pub async fn next_envelope(&mut self) -> Result<Opened> {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .context("timed out waiting for agent")?
                .context("agent closed the stream")??;
            match msg {
                Message::Text(text) => {
                    return Ok(envelope::decode(TOKEN, &Secret::new(SECRET), text.as_bytes())?);
                }
                Message::Close(_) => bail!("agent sent close"),
                _ => continue,
            }
        }
    }

    /// Next envelope of `msg_type`, skipping others (status beats, mostly).
    pub async fn next_of_type(&mut self, msg_type: &str) -> Result<Opened> {
        loop {
            let opened = self.next_envelope().await?;
            if opened.msg_type == msg_type {
                return Ok(opened);
            }
        }
    }
}

/// Loopback control host. Accepts any number of agent connections.
pub struct MockHost {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<HostConn>,
    rejected: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockHost {
    /// Start a host that authenticates agents against `secret`.
    pub async fn start(secret: &str) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, conns) = mpsc::unbounded_channel();
        let rejected = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let secret = Secret::new(secret);
            let rejected = Arc::clone(&rejected);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let tx = tx.clone();
                    let secret = secret.clone();
                    let rejected = Arc::clone(&rejected);
                    tokio::spawn(async move {
                        let seen = Arc::new(Mutex::new(None));
                        let callback = {
                            let seen = Arc::clone(&seen);
                            move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                                match authenticate(req, &secret) {
                                    Some(auth) => {
                                        *seen.lock().unwrap() = Some(auth);
                                        Ok(resp)
                                    }
                                    None => {
                                        let mut deny = ErrorResponse::new(Some("unauthorized".into()));
                                        *deny.status_mut() = StatusCode::UNAUTHORIZED;
                                        Err(deny)
                                    }
                                }
                            }
                        };
                        match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                            Ok(ws) => {
                                let auth = seen.lock().unwrap().take().unwrap();
                                let _ = tx.send(HostConn { ws, auth });
                            }
                            Err(_) => {
                                rejected.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
            })
        };

        Ok(Self { addr, conns, rejected, accept_task })
    }

    /// `host:port` for the agent's identity.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub async fn accept(&mut self) -> Result<HostConn> {
        timeout(WAIT, self.conns.recv())
            .await
            .context("timed out waiting for agent to connect")?
            .context("host accept loop stopped")
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Verify path and signed headers the way the control host does.
fn authenticate(req: &Request, secret: &Secret) -> Option<AuthHeaders> {
    if req.uri().path() != AUTH_PATH {
        return None;
    }
    let header = |name: &str| req.headers().get(name)?.to_str().ok().map(str::to_string);
    let auth = AuthHeaders {
        token: header(HEADER_TOKEN)?,
        signature: header(HEADER_SIGNATURE)?,
        timestamp: header(HEADER_TIMESTAMP)?.parse().ok()?,
        nonce: header(HEADER_NONCE)?,
    };
    (auth.token == TOKEN && auth.verify(secret)).then_some(auth)
}

/// Echo signer; panics on the certificate `"boom"`.
pub struct EchoSigner;

impl Signer for EchoSigner {
    fn sign(&self, serial: &str, request: &SshRequest) -> Result<String, SignError> {
        if request.certificate == "boom" {
            panic!("signer blew up");
        }
        Ok(format!("{serial}:{}", request.certificate))
    }
}

/// Fast timings so tests finish quickly.
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        tls: false,
        handshake_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(5),
        ping_interval: Duration::from_secs(3600),
        status_interval: Duration::from_secs(3600),
        handler_drain: Duration::from_secs(2),
        ..SessionSettings::default()
    }
}

/// A supervised agent running in the background.
pub struct Agent {
    pub status: Arc<AgentStatus>,
    pub memory: Arc<MemorySink>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<u64>,
}

impl Agent {
    pub fn spawn(host: &str, secret: &str, settings: SessionSettings, sink: Option<SharedSink>) -> Self {
        let identity = Arc::new(SessionIdentity::new(SERIAL, TOKEN, Secret::new(secret), host));
        let status = Arc::new(AgentStatus::new());
        let memory = Arc::new(MemorySink::new());
        let sink: SharedSink = match sink {
            Some(extra) => Arc::new(
                hsm_services::SinkSet::new()
                    .with(memory.clone())
                    .with(extra),
            ),
            None => memory.clone(),
        };

        let dispatcher = Arc::new(RequestDispatcher::new(
            Arc::clone(&identity),
            Arc::new(EchoSigner),
            Arc::clone(&status),
        ));
        let session = StreamSession::new(identity, settings, dispatcher, Arc::clone(&status), Arc::clone(&sink));
        let supervisor = Supervisor::new(session, Duration::from_millis(100), sink);

        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(async move { supervisor.run(rx).await });
        Self { status, memory, shutdown, task }
    }

    /// Signal shutdown and wait for the supervisor. Returns sessions run.
    pub async fn stop(self) -> Result<u64> {
        let _ = self.shutdown.send(());
        Ok(timeout(WAIT, self.task).await.context("supervisor did not stop")??)
    }
}

/// Poll until `check` holds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never held: {what}");
}
