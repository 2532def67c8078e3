// ── Realtime connection ──
//
// Owns the push channel for a session: connects with the current access
// token, reconnects with backoff when the transport drops, periodically
// checks whether the token was rotated (forcing a reconnect if so), and
// fans events out to scoped subscribers.

mod bus;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use techtrax_api::Error as ApiError;
use techtrax_api::models::{AckResponse, ChannelUser};
use techtrax_api::socket::{Incoming, ReconnectConfig, SocketTransport, calculate_backoff};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub use bus::{EventKind, PushEvent, Subscription};
use bus::EventBus;

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::model::{ConnectionState, Session};
use crate::token::TokenLifecycleManager;

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── Lifecycle event names ────────────────────────────────────────────

pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_CONNECT_ERROR: &str = "connect_error";

/// Why the connection stopped for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// [`RealtimeConnection::close`] was called.
    Closed,
    /// The token could not be refreshed; credentials are gone.
    SessionInvalid { reason: String },
    /// `max_retries` reconnect attempts failed.
    Unreachable { reason: String },
}

enum ChannelCommand {
    Emit {
        name: String,
        payload: Value,
        ack: Option<oneshot::Sender<Result<AckResponse, CoreError>>>,
    },
    Reconnect,
}

/// How one transport session ended.
enum Outcome {
    Cancelled,
    ForcedReconnect,
    Dropped(String),
    CommandsClosed,
}

// ── RealtimeConnection ───────────────────────────────────────────────

/// The session's push channel.
///
/// Cheaply cloneable via `Arc<ConnectionInner>`. Nothing happens until
/// [`open`](Self::open) is called.
#[derive(Clone)]
pub struct RealtimeConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    tokens: TokenLifecycleManager,
    socket_url: Url,
    handshake_timeout: Duration,
    token_check_interval: Duration,
    ack_timeout: Duration,
    reconnect: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    session: watch::Sender<Option<Session>>,
    ended: watch::Sender<Option<EndReason>>,
    bus: Arc<EventBus>,
    /// Token the current (or next) transport authenticates with.
    channel_token: ArcSwapOption<SecretString>,
    command_tx: mpsc::Sender<ChannelCommand>,
    command_rx: Mutex<Option<mpsc::Receiver<ChannelCommand>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeConnection {
    pub fn new(tokens: TokenLifecycleManager, config: &SessionConfig) -> Result<Self, CoreError> {
        let socket_url = tokens.client().socket_url()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (session, _) = watch::channel(None);
        let (ended, _) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                tokens,
                socket_url,
                handshake_timeout: config.timeout,
                token_check_interval: config.token_check_interval,
                ack_timeout: config.ack_timeout,
                reconnect: config.reconnect.clone(),
                state,
                session,
                ended,
                bus: Arc::new(EventBus::new()),
                channel_token: ArcSwapOption::empty(),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the channel and the token-check timer. Calling it again is a
    /// no-op.
    pub async fn open(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ChannelClosed);
        }
        if !self.inner.tokens.is_authenticated() {
            return Err(CoreError::SessionInvalid {
                reason: "not logged in".into(),
            });
        }
        let Some(rx) = self.inner.command_rx.lock().await.take() else {
            return Ok(());
        };

        self.inner.state.send_replace(ConnectionState::Connecting);
        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(channel_loop(Arc::clone(&self.inner), rx)));
        if !self.inner.token_check_interval.is_zero() {
            handles.push(tokio::spawn(token_check_task(Arc::clone(&self.inner))));
        }
        info!(url = %self.inner.socket_url, "push channel opening");
        Ok(())
    }

    /// Shut the channel down and wait for background tasks to finish.
    pub async fn close(&self) {
        self.inner.teardown(EndReason::Closed);
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("push channel closed");
    }

    /// Force a reconnect with whatever token is current. No `disconnect`
    /// event is published for it.
    pub fn force_reconnect(&self) -> Result<(), CoreError> {
        self.inner
            .command_tx
            .try_send(ChannelCommand::Reconnect)
            .map_err(|_| CoreError::ChannelClosed)
    }

    /// Re-evaluate token expiry now (the timer does this every
    /// `token_check_interval`). Returns `true` if a reconnect was forced.
    pub async fn rotate_if_needed(&self) -> Result<bool, CoreError> {
        self.inner.rotate_if_needed().await
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The authenticated user of the current connection.
    pub fn session(&self) -> Option<Session> {
        self.inner.session.borrow().clone()
    }

    pub fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.inner.session.subscribe()
    }

    /// Resolves to `Some` once the connection has stopped for good.
    pub fn ended(&self) -> watch::Receiver<Option<EndReason>> {
        self.inner.ended.subscribe()
    }

    /// Current connection generation.
    pub fn generation(&self) -> u64 {
        self.inner.bus.generation()
    }

    /// Wait until the server has sent `connected` for the current transport.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<Session, CoreError> {
        let mut session_rx = self.inner.session.subscribe();
        let mut ended_rx = self.inner.ended.subscribe();

        let wait = async {
            tokio::select! {
                session = session_rx.wait_for(Option::is_some) => {
                    session.ok().and_then(|s| s.clone()).ok_or(CoreError::ChannelClosed)
                }
                reason = ended_rx.wait_for(Option::is_some) => {
                    Err(end_error(reason.ok().and_then(|r| r.clone())))
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_ms: duration_ms(timeout),
            })?
    }

    // ── Pub/sub ──────────────────────────────────────────────────────

    /// Receive only the named events. The handle unregisters on drop.
    pub fn subscribe<I, S>(&self, names: I) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.inner.bus.subscribe(Some(names))
    }

    /// Receive every event.
    pub fn subscribe_all(&self) -> Subscription {
        self.inner.bus.subscribe(None)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.subscriber_count()
    }

    /// Fire-and-forget event. Buffered while the channel reconnects.
    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.inner
            .command_tx
            .send(ChannelCommand::Emit {
                name: name.to_owned(),
                payload,
                ack: None,
            })
            .await
            .map_err(|_| CoreError::ChannelClosed)
    }

    /// Emit and wait for the server's `{success, error?}` ack.
    ///
    /// `success: false` surfaces as [`CoreError::Rejected`].
    pub async fn emit_with_ack(&self, name: &str, payload: Value) -> Result<AckResponse, CoreError> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(ChannelCommand::Emit {
                name: name.to_owned(),
                payload,
                ack: Some(tx),
            })
            .await
            .map_err(|_| CoreError::ChannelClosed)?;

        let ack = tokio::time::timeout(self.inner.ack_timeout, rx)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_ms: duration_ms(self.inner.ack_timeout),
            })?
            .map_err(|_| CoreError::ChannelClosed)??;

        if ack.success {
            Ok(ack)
        } else {
            Err(CoreError::Rejected {
                message: ack
                    .error
                    .unwrap_or_else(|| format!("{name} was rejected")),
            })
        }
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.state() == ConnectionState::Disconnected {
            return Err(CoreError::ChannelClosed);
        }
        Ok(())
    }
}

impl ConnectionInner {
    fn publish_lifecycle(&self, name: &str, payload: Value) {
        self.bus.publish(PushEvent {
            name: name.to_owned(),
            payload,
            generation: self.bus.generation(),
            kind: EventKind::Lifecycle,
        });
    }

    fn handle_server_event(&self, name: String, payload: Value, generation: u64) {
        if name == EVENT_CONNECTED {
            let user = payload
                .get("user")
                .and_then(|u| serde_json::from_value::<ChannelUser>(u.clone()).ok());
            let session = Session::from_parts(user.as_ref(), self.tokens.claims().as_ref());
            info!(user = %session.user_id, role = %session.role, "push channel authenticated");
            self.session.send_replace(Some(session));
            self.state.send_replace(ConnectionState::Connected);
        }

        self.bus.publish(PushEvent {
            name,
            payload,
            generation,
            kind: EventKind::Server,
        });
    }

    async fn rotate_if_needed(&self) -> Result<bool, CoreError> {
        let token = match self.tokens.get_valid_access_token().await {
            Ok(token) => token,
            Err(e) => {
                self.teardown(EndReason::SessionInvalid {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let rotated = self
            .channel_token
            .load()
            .as_ref()
            .is_none_or(|current| current.expose_secret() != token.expose_secret());
        if rotated {
            info!("access token rotated, reconnecting push channel");
            self.command_tx
                .try_send(ChannelCommand::Reconnect)
                .map_err(|_| CoreError::ChannelClosed)?;
        }
        Ok(rotated)
    }

    /// Stop everything. Idempotent.
    fn teardown(&self, reason: EndReason) {
        if self.ended.borrow().is_some() {
            return;
        }
        match &reason {
            EndReason::Closed => info!("push channel shutting down"),
            EndReason::SessionInvalid { reason } => {
                error!(%reason, "session invalid, tearing down push channel");
            }
            EndReason::Unreachable { reason } => {
                error!(%reason, "push channel unreachable, giving up");
            }
        }

        self.cancel.cancel();
        self.session.send_replace(None);
        self.state.send_replace(ConnectionState::Disconnected);
        self.ended.send_replace(Some(reason));
        self.bus.close();
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Connect → drive → on drop, back off → reconnect.
async fn channel_loop(inner: Arc<ConnectionInner>, mut rx: mpsc::Receiver<ChannelCommand>) {
    let mut attempt: u32 = 0;
    let mut backlog: Vec<ChannelCommand> = Vec::new();

    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        let token = match inner.tokens.get_valid_access_token().await {
            Ok(token) => token,
            Err(e) => {
                inner.teardown(EndReason::SessionInvalid {
                    reason: e.to_string(),
                });
                break;
            }
        };
        inner.channel_token.store(Some(Arc::new(token.clone())));
        inner.state.send_replace(ConnectionState::Connecting);

        let auth = json!({ "token": token.expose_secret() });
        let connected = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            result = SocketTransport::connect(&inner.socket_url, auth, inner.handshake_timeout) => result,
        };

        let delay = match connected {
            Ok(transport) => {
                attempt = 0;
                let generation = inner.bus.advance_generation();
                debug!(generation, sid = transport.sid(), "transport up");
                inner.publish_lifecycle(EVENT_CONNECT, json!({ "sid": transport.sid() }));

                let outcome = drive(&inner, transport, &mut rx, &mut backlog, generation).await;
                inner.session.send_replace(None);
                match outcome {
                    Outcome::Cancelled | Outcome::CommandsClosed => break,
                    Outcome::ForcedReconnect => {
                        debug!("forced reconnect");
                        continue;
                    }
                    Outcome::Dropped(reason) => {
                        warn!(%reason, "push channel dropped");
                        inner.state.send_replace(ConnectionState::Connecting);
                        inner.publish_lifecycle(EVENT_DISCONNECT, json!({ "reason": reason }));
                        calculate_backoff(0, &inner.reconnect)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, attempt, "push channel connect failed");
                if let ApiError::ConnectRejected { ref message } = e {
                    inner.publish_lifecycle(EVENT_CONNECT_ERROR, json!({ "message": message }));

                    // the server may reject a token that still looks valid locally
                    info!(%message, "push channel refused the token, refreshing");
                    let refreshed = tokio::select! {
                        biased;
                        _ = inner.cancel.cancelled() => break,
                        result = inner.tokens.refresh() => result,
                    };
                    if let Err(refresh_err) = refreshed {
                        inner.teardown(EndReason::SessionInvalid {
                            reason: refresh_err.to_string(),
                        });
                        break;
                    }
                }

                if inner.reconnect.max_retries.is_some_and(|max| attempt >= max) {
                    inner.teardown(EndReason::Unreachable {
                        reason: e.to_string(),
                    });
                    break;
                }

                let delay = calculate_backoff(attempt, &inner.reconnect);
                attempt += 1;
                delay
            }
        };

        debug!(delay_ms = duration_ms(delay), "waiting before reconnect");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                () = inner.cancel.cancelled() => break,
                () = &mut sleep => break,
                cmd = rx.recv() => match cmd {
                    Some(ChannelCommand::Reconnect) => break,
                    Some(emit) => backlog.push(emit),
                    None => return,
                },
            }
        }
    }

    for cmd in backlog {
        if let ChannelCommand::Emit { ack: Some(tx), .. } = cmd {
            let _ = tx.send(Err(CoreError::ChannelClosed));
        }
    }
    debug!("push channel loop exiting");
}

/// Pump one transport until it ends.
async fn drive(
    inner: &ConnectionInner,
    mut transport: SocketTransport,
    rx: &mut mpsc::Receiver<ChannelCommand>,
    backlog: &mut Vec<ChannelCommand>,
    generation: u64,
) -> Outcome {
    let mut next_ack_id: u64 = 0;
    let mut pending: HashMap<u64, oneshot::Sender<Result<AckResponse, CoreError>>> =
        HashMap::new();

    let mut queued: Vec<ChannelCommand> = std::mem::take(backlog);
    queued.reverse();

    let outcome = loop {
        // buffered emits go out before anything new
        let command = if let Some(cmd) = queued.pop() {
            Some(cmd)
        } else {
            tokio::select! {
                biased;
                () = inner.cancel.cancelled() => {
                    if let Err(e) = transport.close().await {
                        debug!(error = %e, "close handshake failed");
                    }
                    break Outcome::Cancelled;
                }
                cmd = rx.recv() => match cmd {
                    Some(cmd) => Some(cmd),
                    None => break Outcome::CommandsClosed,
                },
                incoming = transport.next() => {
                    match incoming {
                        Ok(Incoming::Event { name, args, ack_id }) => {
                            if let Some(id) = ack_id {
                                if let Err(e) = transport.ack(id, Vec::new()).await {
                                    break Outcome::Dropped(e.to_string());
                                }
                            }
                            inner.handle_server_event(name, event_payload(args), generation);
                        }
                        Ok(Incoming::Ack { id, args }) => {
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(decode_ack(args));
                            }
                        }
                        Ok(Incoming::Disconnected { reason }) => break Outcome::Dropped(reason),
                        Err(e) => break Outcome::Dropped(e.to_string()),
                    }
                    None
                }
            }
        };

        match command {
            None => {}
            Some(ChannelCommand::Reconnect) => {
                if let Err(e) = transport.close().await {
                    debug!(error = %e, "close before reconnect failed");
                }
                break Outcome::ForcedReconnect;
            }
            Some(ChannelCommand::Emit { name, payload, ack }) => {
                let id = ack.as_ref().map(|_| {
                    next_ack_id += 1;
                    next_ack_id
                });
                match transport.emit(&name, vec![payload], id).await {
                    Ok(()) => {
                        if let (Some(id), Some(tx)) = (id, ack) {
                            pending.insert(id, tx);
                        }
                    }
                    Err(e) => {
                        if let Some(tx) = ack {
                            let _ = tx.send(Err(CoreError::ChannelClosed));
                        }
                        break Outcome::Dropped(e.to_string());
                    }
                }
            }
        }
    };

    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(CoreError::ChannelClosed));
    }
    // anything not yet sent waits for the next transport
    queued.reverse();
    backlog.extend(queued);
    outcome
}

/// Re-check the token every `token_check_interval`.
async fn token_check_task(inner: Arc<ConnectionInner>) {
    let mut interval = tokio::time::interval(inner.token_check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            _ = interval.tick() => {
                match inner.rotate_if_needed().await {
                    Ok(_) => {}
                    Err(CoreError::SessionInvalid { .. }) => break,
                    Err(e) => warn!(error = %e, "token check failed"),
                }
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Single-argument events carry that argument; others keep the array.
fn event_payload(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.pop().unwrap_or(Value::Null),
        _ => Value::Array(args),
    }
}

fn decode_ack(args: Vec<Value>) -> Result<AckResponse, CoreError> {
    let first = args.into_iter().next().unwrap_or(Value::Null);
    serde_json::from_value(first)
        .map_err(|e| CoreError::Internal(format!("unreadable ack: {e}")))
}

fn end_error(reason: Option<EndReason>) -> CoreError {
    match reason {
        Some(EndReason::SessionInvalid { reason }) => CoreError::SessionInvalid { reason },
        Some(EndReason::Unreachable { reason }) => CoreError::ConnectionFailed {
            url: String::new(),
            reason,
        },
        Some(EndReason::Closed) | None => CoreError::ChannelClosed,
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
