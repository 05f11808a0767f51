//! Transport connection state machine.
//!
//! Pure state: the caller feeds socket and timer events in and drains
//! [`Effect`]s out. Closing a socket on purpose (`CloseSocket`) never reports a
//! close event back, the machine moves itself to `Disconnected`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::protocol::ClientMessage;

/// Connectivity as seen by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Badge text shown next to the connectivity indicator.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "Live",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Disconnected => "Offline",
        }
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new socket, replacing any existing one.
    OpenSocket,
    /// Drop the current socket (open or still opening) without reporting it.
    CloseSocket,
    Send(ClientMessage),
    /// Arm the single reconnect timer.
    ScheduleReconnect(Duration),
    CancelReconnect,
    StateChanged(ConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketPhase {
    None,
    Opening,
    Open,
}

pub struct Connection {
    state: ConnectionState,
    token: Option<String>,
    intentionally_closed: bool,
    socket: SocketPhase,
    reconnect_pending: bool,
    backoff: Backoff,
    effects: Vec<Effect>,
}

impl Connection {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            token: None,
            intentionally_closed: false,
            socket: SocketPhase::None,
            reconnect_pending: false,
            backoff,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_intentionally_closed(&self) -> bool {
        self.intentionally_closed
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempt()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Start (or keep) a session for `token`. A different token while
    /// connected or connecting forces a full disconnect first.
    pub fn connect(&mut self, token: String) {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            if self.token.as_deref() == Some(token.as_str()) {
                return;
            }
            debug!("token changed, restarting connection");
            self.disconnect();
        }
        self.token = Some(token);
        self.intentionally_closed = false;
        self.open();
    }

    /// Terminal until the next `connect`.
    pub fn disconnect(&mut self) {
        self.intentionally_closed = true;
        self.cancel_reconnect();
        self.close_socket();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drop the current socket and reconnect right away with a fresh schedule.
    pub fn force_reconnect(&mut self) {
        self.cancel_reconnect();
        self.close_socket();
        self.backoff.reset();
        self.intentionally_closed = false;
        self.set_state(ConnectionState::Disconnected);
        self.open();
    }

    /// Host returned to the foreground.
    pub fn on_foreground(&mut self) {
        if self.state != ConnectionState::Disconnected || self.intentionally_closed {
            return;
        }
        debug!("foreground resume, reconnecting immediately");
        self.cancel_reconnect();
        self.backoff.reset();
        self.open();
    }

    pub fn on_socket_open(&mut self) {
        if self.socket != SocketPhase::Opening {
            return;
        }
        self.socket = SocketPhase::Open;
        if let Some(token) = self.token.clone() {
            self.send(ClientMessage::Authenticate { token });
        }
    }

    /// The socket closed, or failed to open, for a reason we did not cause.
    pub fn on_socket_closed(&mut self) {
        if self.socket == SocketPhase::None {
            return;
        }
        self.socket = SocketPhase::None;
        self.set_state(ConnectionState::Disconnected);
        if !self.intentionally_closed {
            self.schedule_reconnect();
        }
    }

    pub fn on_reconnect_timer(&mut self) {
        if !self.reconnect_pending {
            return;
        }
        self.reconnect_pending = false;
        if !self.intentionally_closed && self.state == ConnectionState::Disconnected {
            self.open();
        }
    }

    /// Server accepted the token.
    pub fn on_authenticated(&mut self) {
        if self.socket != SocketPhase::Open {
            return;
        }
        self.backoff.reset();
        self.set_state(ConnectionState::Connected);
    }

    /// Server rejected the token: stop for good until the next `connect`.
    pub fn on_authentication_failed(&mut self) {
        warn!("authentication failed, not reconnecting");
        self.intentionally_closed = true;
        self.cancel_reconnect();
        self.close_socket();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Queue a message if a socket is open; otherwise drop it.
    pub fn send(&mut self, msg: ClientMessage) {
        if self.socket == SocketPhase::Open {
            self.effects.push(Effect::Send(msg));
        }
    }

    fn open(&mut self) {
        if self.token.is_none() {
            return;
        }
        if self.socket != SocketPhase::None {
            self.effects.push(Effect::CloseSocket);
        }
        self.socket = SocketPhase::Opening;
        self.set_state(ConnectionState::Connecting);
        self.effects.push(Effect::OpenSocket);
    }

    fn close_socket(&mut self) {
        if self.socket != SocketPhase::None {
            self.socket = SocketPhase::None;
            self.effects.push(Effect::CloseSocket);
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.intentionally_closed || self.reconnect_pending {
            return;
        }
        let delay = self.backoff.next_delay();
        self.reconnect_pending = true;
        info!(
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.effects.push(Effect::ScheduleReconnect(delay));
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.effects.push(Effect::CancelReconnect);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(from = ?self.state, to = ?state, "connection state changed");
            self.state = state;
            self.effects.push(Effect::StateChanged(state));
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}
