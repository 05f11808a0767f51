//! Async client: one actor task owning the session and its socket.
//!
//! Everything that touches the session (user commands, socket events, the
//! reconnect timer) runs on that task, in arrival order. [`SyncClient`] is the
//! cheap handle that feeds it.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::connection::{ConnectionState, Effect};
use crate::error::TransportError;
use crate::multiplexer::{HandlerId, MessageHandler};
use crate::protocol::{Channel, Params, ServerMessage, SubscriptionKey, subscription_key};
use crate::session::Session;
use crate::transport::{Connector, FrameSink, FrameStream, Socket};

enum Command {
    Connect {
        token: String,
    },
    Disconnect,
    ForceReconnect,
    Foreground,
    Subscribe {
        id: HandlerId,
        channel: Channel,
        params: Params,
        handler: MessageHandler,
    },
    Unsubscribe {
        id: HandlerId,
    },
    KeepAlive {
        agent_ids: Vec<String>,
    },
}

/// Handle to a running client actor.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    next_handler: AtomicU64,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SyncClient {
    /// Start the actor on the current tokio runtime. Nothing connects until
    /// [`connect`](Self::connect) is called.
    pub fn spawn(connector: impl Connector, config: &SyncConfig) -> Self {
        Self::spawn_with_backoff(connector, config.reconnect.backoff())
    }

    pub fn spawn_with_backoff(connector: impl Connector, backoff: Backoff) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let actor = Actor {
            session: Session::new(backoff),
            connector: Arc::new(connector),
            commands: cmd_rx,
            state_tx,
            cancel: cancel.clone(),
            opening: None,
            sink: None,
            stream: None,
            reconnect_at: None,
        };
        let task = tokio::spawn(actor.run());

        Self {
            inner: Arc::new(Inner {
                commands: cmd_tx,
                state: state_rx,
                next_handler: AtomicU64::new(1),
                cancel,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Stop the actor and wait for it to drop its socket.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "client actor panicked");
            }
        }
    }

    pub fn connect(&self, token: impl Into<String>) {
        self.send(Command::Connect {
            token: token.into(),
        });
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    pub fn force_reconnect(&self) {
        self.send(Command::ForceReconnect);
    }

    /// The host process came back to the foreground.
    pub fn notify_foreground(&self) {
        self.send(Command::Foreground);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Register `handler` for every snapshot and delta on (channel, params).
    /// Dropping the returned guard unsubscribes.
    pub fn subscribe<F>(&self, channel: Channel, params: Params, mut handler: F) -> Subscription
    where
        F: FnMut(&ServerMessage) + Send + 'static,
    {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::Relaxed));
        let key = subscription_key(channel, &params);
        let live = Arc::new(AtomicBool::new(true));

        let flag = live.clone();
        let wrapped: MessageHandler = Box::new(move |msg: &ServerMessage| {
            if flag.load(Ordering::Acquire) {
                handler(msg);
            }
        });
        self.send(Command::Subscribe {
            id,
            channel,
            params,
            handler: wrapped,
        });

        Subscription {
            id,
            key,
            live,
            commands: self.inner.commands.clone(),
        }
    }

    /// Best-effort liveness signal for `agent_ids`. Dropped when offline.
    pub fn send_keep_alive(&self, agent_ids: Vec<String>) {
        self.send(Command::KeepAlive { agent_ids });
    }

    fn send(&self, cmd: Command) {
        if self.inner.commands.send(cmd).is_err() {
            debug!("client actor stopped, dropping command");
        }
    }
}

/// One registered handler. Unsubscribes on drop.
pub struct Subscription {
    id: HandlerId,
    key: SubscriptionKey,
    live: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Stop deliveries to this handler now and release its share of the
    /// subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.live.swap(false, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Unsubscribe { id: self.id });
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

// =============================================================================
// Actor
// =============================================================================

enum Event {
    Command(Option<Command>),
    Opened(Result<Socket, TransportError>),
    Frame(Option<Result<String, TransportError>>),
    ReconnectDue,
    Cancelled,
}

struct Actor {
    session: Session,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    opening: Option<BoxFuture<'static, Result<Socket, TransportError>>>,
    sink: Option<FrameSink>,
    stream: Option<FrameStream>,
    reconnect_at: Option<Instant>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => Event::Cancelled,
                cmd = self.commands.recv() => Event::Command(cmd),
                res = opened(&mut self.opening) => Event::Opened(res),
                frame = next_frame(&mut self.stream) => Event::Frame(frame),
                _ = reconnect_due(self.reconnect_at) => Event::ReconnectDue,
            };

            match event {
                Event::Cancelled | Event::Command(None) => break,
                Event::Command(Some(cmd)) => self.handle_command(cmd),
                Event::Opened(Ok(socket)) => {
                    self.opening = None;
                    self.sink = Some(socket.sink);
                    self.stream = Some(socket.stream);
                    debug!("socket open");
                    self.session.on_socket_open();
                }
                Event::Opened(Err(e)) => {
                    self.opening = None;
                    // Nothing listening is routine while the backend is down.
                    if e.is_unreachable() {
                        debug!(error = %e, "backend unreachable");
                    } else {
                        warn!(error = %e, "failed to open socket");
                    }
                    self.session.on_socket_closed();
                }
                Event::Frame(Some(Ok(text))) => self.session.handle_text(&text),
                Event::Frame(Some(Err(e))) => {
                    warn!(error = %e, "socket error");
                    self.drop_socket();
                    self.session.on_socket_closed();
                }
                Event::Frame(None) => {
                    debug!("socket closed by peer");
                    self.drop_socket();
                    self.session.on_socket_closed();
                }
                Event::ReconnectDue => {
                    self.reconnect_at = None;
                    self.session.on_reconnect_timer();
                }
            }

            self.apply_effects().await;
        }

        self.drop_socket();
        self.opening = None;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        debug!("client actor stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { token } => self.session.connect(token),
            Command::Disconnect => self.session.disconnect(),
            Command::ForceReconnect => self.session.force_reconnect(),
            Command::Foreground => self.session.on_foreground(),
            Command::Subscribe {
                id,
                channel,
                params,
                handler,
            } => self.session.subscribe(channel, params, id, handler),
            Command::Unsubscribe { id } => self.session.unsubscribe(id),
            Command::KeepAlive { agent_ids } => self.session.send_keep_alive(agent_ids),
        }
    }

    async fn apply_effects(&mut self) {
        loop {
            let effects = self.session.take_effects();
            if effects.is_empty() {
                return;
            }
            for effect in effects {
                match effect {
                    Effect::OpenSocket => {
                        self.drop_socket();
                        self.opening = Some(self.connector.connect());
                    }
                    Effect::CloseSocket => {
                        self.drop_socket();
                        self.opening = None;
                    }
                    Effect::Send(msg) => {
                        let Some(sink) = self.sink.as_mut() else {
                            debug!("no socket, dropping outbound message");
                            continue;
                        };
                        let text = match serde_json::to_string(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "failed to encode client message");
                                continue;
                            }
                        };
                        let result = sink.send(text).await;
                        if let Err(e) = result {
                            warn!(error = %e, "send failed, dropping socket");
                            self.drop_socket();
                            self.session.on_socket_closed();
                        }
                    }
                    Effect::ScheduleReconnect(delay) => {
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    Effect::CancelReconnect => self.reconnect_at = None,
                    Effect::StateChanged(state) => {
                        self.state_tx.send_replace(state);
                    }
                }
            }
        }
    }

    fn drop_socket(&mut self) {
        self.stream = None;
        if let Some(mut sink) = self.sink.take() {
            tokio::spawn(async move {
                let _ = sink.close().await;
            });
        }
    }
}

async fn opened(
    opening: &mut Option<BoxFuture<'static, Result<Socket, TransportError>>>,
) -> Result<Socket, TransportError> {
    match opening {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Result<String, TransportError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
