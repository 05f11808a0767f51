//! Connection + multiplexer, driven by one owner.
//!
//! The client actor owns exactly one `Session` and is the only thing that
//! touches it, so no locking happens here.

use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::connection::{Connection, ConnectionState, Effect};
use crate::multiplexer::{HandlerId, MessageHandler, Multiplexer};
use crate::protocol::{Channel, ClientMessage, Params, ServerMessage};

pub struct Session {
    connection: Connection,
    mux: Multiplexer,
}

impl Session {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            connection: Connection::new(backoff),
            mux: Multiplexer::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        self.connection.take_effects()
    }

    pub fn connect(&mut self, token: String) {
        self.connection.connect(token);
        self.sync_activity();
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.sync_activity();
    }

    pub fn force_reconnect(&mut self) {
        self.connection.force_reconnect();
        self.sync_activity();
    }

    pub fn on_foreground(&mut self) {
        self.connection.on_foreground();
    }

    pub fn on_socket_open(&mut self) {
        self.connection.on_socket_open();
    }

    pub fn on_socket_closed(&mut self) {
        self.connection.on_socket_closed();
        self.sync_activity();
    }

    pub fn on_reconnect_timer(&mut self) {
        self.connection.on_reconnect_timer();
    }

    pub fn subscribe(
        &mut self,
        channel: Channel,
        params: Params,
        id: HandlerId,
        handler: MessageHandler,
    ) {
        let connected = self.connection.is_connected();
        if let Some(msg) = self.mux.subscribe(channel, params, id, handler, connected) {
            self.connection.send(msg);
        }
    }

    pub fn unsubscribe(&mut self, id: HandlerId) {
        let connected = self.connection.is_connected();
        if let Some(msg) = self.mux.unsubscribe(id, connected) {
            self.connection.send(msg);
        }
    }

    pub fn send_keep_alive(&mut self, agent_ids: Vec<String>) {
        let connected = self.connection.is_connected();
        if let Some(msg) = self.mux.keep_alive(agent_ids, connected) {
            self.connection.send(msg);
        }
    }

    /// Parse and dispatch one inbound text frame. Malformed frames are dropped.
    pub fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => self.handle_message(msg),
            Err(e) => debug!(error = %e, "dropping malformed server message"),
        }
    }

    pub fn handle_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Authenticated { ref user_id } => {
                info!(%user_id, "authenticated");
                self.connection.on_authenticated();
                if self.connection.is_connected() {
                    for resume in self.mux.resume() {
                        self.connection.send(resume);
                    }
                }
            }
            ServerMessage::Snapshot { .. } | ServerMessage::Delta { .. } => {
                self.mux.route(&msg);
            }
            ServerMessage::Error {
                ref request_id,
                ref error,
            } => {
                if error.is_authentication_failure() {
                    self.connection.on_authentication_failed();
                    self.sync_activity();
                } else {
                    warn!(
                        code = %error.code,
                        message = %error.message,
                        request_id = request_id.as_deref().unwrap_or("-"),
                        "server error"
                    );
                }
            }
            ServerMessage::Ping { timestamp } => {
                self.connection.send(ClientMessage::Pong { timestamp });
            }
            ServerMessage::KeepAliveResponse {
                ref request_id,
                ref results,
            } => {
                debug!(
                    request_id = request_id.as_deref().unwrap_or("-"),
                    agents = results.len(),
                    "keep-alive acknowledged"
                );
            }
        }
    }

    fn sync_activity(&mut self) {
        if !self.connection.is_connected() {
            self.mux.mark_inactive();
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}
