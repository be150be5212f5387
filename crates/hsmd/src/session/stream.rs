//! Session pump: reader, handlers, status ticker and the single writer.
//!
//! One reader task pulls frames off the socket and spawns a bounded handler
//! per frame. Handlers and the status ticker push onto the outbound queue;
//! only the writer loop touches the socket sink. The first read or write
//! failure ends the session, and the supervisor decides what happens next.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use hsm_core::{envelope, AgentError, Envelope, SessionIdentity};
use hsm_services::SharedSink;

use super::handshake;
use super::queue::{outbound_queue, OutboundQueue};
use super::{SessionSettings, SessionState};
use crate::dispatch::{panic_message, RequestDispatcher};
use crate::status::AgentStatus;

/// Shared by every handler spawned during a session.
struct HandlerContext {
    identity: Arc<SessionIdentity>,
    dispatcher: Arc<RequestDispatcher>,
    status: Arc<AgentStatus>,
    sink: SharedSink,
}

pub struct StreamSession {
    identity: Arc<SessionIdentity>,
    settings: SessionSettings,
    dispatcher: Arc<RequestDispatcher>,
    status: Arc<AgentStatus>,
    sink: SharedSink,
    state: watch::Sender<SessionState>,
}

impl StreamSession {
    pub fn new(
        identity: Arc<SessionIdentity>,
        settings: SessionSettings,
        dispatcher: Arc<RequestDispatcher>,
        status: Arc<AgentStatus>,
        sink: SharedSink,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Closed);
        Self { identity, settings, dispatcher, status, sink, state }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Observe state transitions of this session.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "session state");
        }
    }

    /// Dial, authenticate and serve until the connection fails or shutdown
    /// is signalled. `Ok(())` only after a graceful close.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<(), AgentError> {
        self.set_state(SessionState::Connecting);
        let stream = match handshake::connect(&self.identity, &self.settings).await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(SessionState::Closed);
                return Err(e);
            }
        };
        self.sink.info(&[("host", self.identity.host.clone())], "session: Connected to host");
        self.serve(stream, shutdown).await
    }

    /// Run the message pump over an already-upgraded connection.
    pub async fn serve<T>(
        &self,
        ws: WebSocketStream<T>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), AgentError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.set_state(SessionState::Active);

        let (mut sink, stream) = ws.split();
        let (queue, mut outbound) = outbound_queue(self.settings.queue_capacity);
        // One slot per task that can fail: the reader and the ticker.
        let (fault_tx, mut faults) = mpsc::channel::<AgentError>(2);
        let (stop_tx, stop_rx) = watch::channel(false);

        let ctx = Arc::new(HandlerContext {
            identity: Arc::clone(&self.identity),
            dispatcher: Arc::clone(&self.dispatcher),
            status: Arc::clone(&self.status),
            sink: Arc::clone(&self.sink),
        });

        let reader = tokio::spawn(read_loop(
            stream,
            ctx,
            queue.clone(),
            fault_tx.clone(),
            stop_rx.clone(),
            self.settings.max_handlers,
            self.settings.handler_drain,
        ));
        let ticker = tokio::spawn(status_loop(
            Arc::clone(&self.identity),
            Arc::clone(&self.status),
            queue,
            fault_tx,
            stop_rx,
            self.settings.status_interval,
        ));

        let write_timeout = self.settings.write_timeout;
        let ping_every = self.settings.ping_interval;
        let mut ping = interval_at(Instant::now() + ping_every, ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut listening = true;

        let result = loop {
            tokio::select! {
                item = outbound.next() => match item {
                    Some(envelope) => {
                        if let Err(e) = write_envelope(&mut sink, &envelope, write_timeout).await {
                            break Err(e);
                        }
                    }
                    None => {
                        // Every producer is done: the graceful path.
                        let _ = timeout(write_timeout, sink.send(Message::Close(None))).await;
                        break Ok(());
                    }
                },

                _ = ping.tick() => {
                    if let Err(e) = send_frame(&mut sink, Message::Ping(Default::default()), write_timeout, "session: Failed to write ping").await {
                        break Err(e);
                    }
                }

                Some(fault) = faults.recv() => break Err(fault),

                signal = shutdown.recv(), if listening => {
                    listening = false;
                    if !matches!(signal, Err(broadcast::error::RecvError::Closed)) {
                        tracing::info!("session shutdown requested, draining handlers");
                        self.set_state(SessionState::Closing);
                        let _ = stop_tx.send(true);
                    }
                }
            }
        };

        self.set_state(SessionState::Closing);
        reader.abort();
        ticker.abort();
        outbound.close();
        let _ = timeout(write_timeout, sink.close()).await;
        self.set_state(SessionState::Closed);

        if let Err(e) = &result {
            tracing::debug!(error = %e, "session ended");
        }
        result
    }
}

async fn write_envelope<S>(sink: &mut S, envelope: &Envelope, deadline: Duration) -> Result<(), AgentError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let text = envelope.to_json()?;
    send_frame(sink, Message::Text(text.into()), deadline, "session: Failed to write message").await?;
    tracing::trace!(id = %envelope.id, msg_type = %envelope.msg_type, "envelope written");
    Ok(())
}

async fn send_frame<S>(
    sink: &mut S,
    message: Message,
    deadline: Duration,
    context: &'static str,
) -> Result<(), AgentError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AgentError::write(context, e)),
        Err(elapsed) => Err(AgentError::write(context, elapsed)),
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

async fn read_loop<S>(
    mut stream: S,
    ctx: Arc<HandlerContext>,
    queue: OutboundQueue,
    faults: mpsc::Sender<AgentError>,
    mut stop: watch::Receiver<bool>,
    max_handlers: usize,
    drain: Duration,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let permits = Arc::new(Semaphore::new(max_handlers.max(1)));
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            frame = stream.next() => {
                let bytes = match frame {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "host sent close");
                        let _ = faults.send(AgentError::read("session: Host closed connection", "close frame received")).await;
                        return;
                    }
                    // Ping replies are queued by the protocol layer.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = faults.send(AgentError::read("session: Failed to read message", e)).await;
                        return;
                    }
                    None => {
                        let _ = faults.send(AgentError::read("session: Failed to read message", "connection closed")).await;
                        return;
                    }
                };

                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    return;
                };
                let ctx = Arc::clone(&ctx);
                let queue = queue.clone();
                handlers.spawn(async move {
                    handle_frame(&ctx, &queue, &bytes).await;
                    drop(permit);
                });
            }

            Some(joined) = handlers.join_next(), if !handlers.is_empty() => reap(&ctx, joined),

            Ok(()) = stop.changed() => break,
        }
    }

    // Shutdown: no new frames, give in-flight handlers a bounded window.
    let pending = handlers.len();
    let drained = timeout(drain, async {
        while let Some(joined) = handlers.join_next().await {
            reap(&ctx, joined);
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(pending, remaining = handlers.len(), "abandoning in-flight handlers");
        handlers.abort_all();
    }
}

fn reap(ctx: &HandlerContext, joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            ctx.status.record_dropped();
            ctx.sink.error(&[("error", panic_message(e.into_panic()))], "session: Message handle error");
        }
    }
}

async fn handle_frame(ctx: &HandlerContext, queue: &OutboundQueue, frame: &[u8]) {
    let opened = match envelope::decode(&ctx.identity.token, &ctx.identity.secret, frame) {
        Ok(opened) => opened,
        Err(e) => {
            ctx.status.record_dropped();
            ctx.sink.error(&[("error", e.to_string())], "session: Unmarshal payload error");
            return;
        }
    };

    let id = opened.id.clone();
    let msg_type = opened.msg_type.clone();
    match ctx.dispatcher.dispatch(opened).await {
        Ok(Some(response)) => {
            if queue.enqueue(response).await.is_err() {
                tracing::debug!(%id, "session closed before response was queued");
            }
        }
        Ok(None) => {}
        Err(e) => {
            if e.is_malformed() {
                ctx.status.record_dropped();
            }
            ctx.sink.error(
                &[("id", id), ("type", msg_type), ("error", e.to_string())],
                "session: Message handle error",
            );
        }
    }
}

// ── Status ticker ─────────────────────────────────────────────────────────────

async fn status_loop(
    identity: Arc<SessionIdentity>,
    status: Arc<AgentStatus>,
    queue: OutboundQueue,
    faults: mpsc::Sender<AgentError>,
    mut stop: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let envelope = match status.envelope(&identity) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        let _ = faults.send(e.into()).await;
                        return;
                    }
                };
                // Blocks while the queue is full.
                if queue.enqueue(envelope).await.is_err() {
                    return;
                }
            }
            Ok(()) = stop.changed() => return,
        }
    }
}
