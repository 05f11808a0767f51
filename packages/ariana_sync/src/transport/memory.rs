//! In-process connector.
//!
//! Every `connect()` on a [`MemoryConnector`] hands a [`MemoryPeer`] to the
//! paired [`MemoryServer`], which plays the backend side of that socket.

use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

use super::{Connector, Socket};
use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};

struct Shared {
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Server end of one in-memory socket.
pub struct MemoryPeer {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded();
    let shared = Arc::new(Shared {
        refuse: AtomicBool::new(false),
        attempts: AtomicUsize::new(0),
    });
    (
        MemoryConnector {
            accept_tx,
            shared: shared.clone(),
        },
        MemoryServer { accept_rx, shared },
    )
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Socket, TransportError>> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refuse.load(Ordering::SeqCst) {
            return future::ready(Err(TransportError::Refused)).boxed();
        }

        let (to_server, from_client) = mpsc::unbounded::<String>();
        let (to_client, from_server) = mpsc::unbounded::<String>();
        let peer = MemoryPeer {
            outbound: Some(to_client),
            inbound: from_client,
        };
        if self.accept_tx.unbounded_send(peer).is_err() {
            return future::ready(Err(TransportError::Refused)).boxed();
        }

        let sink = to_server.sink_map_err(|_| TransportError::Closed);
        let stream = from_server.map(Ok);
        future::ready(Ok(Socket::new(Box::pin(sink), Box::pin(stream)))).boxed()
    }
}

impl MemoryServer {
    /// Wait for the next client connection. `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.next().await
    }

    /// While set, connection attempts fail immediately with `Refused`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

impl MemoryPeer {
    /// Next raw frame from the client. `None` once the client dropped the socket.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.inbound.next().await
    }

    /// Next parseable client message, skipping anything malformed.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        loop {
            let text = self.recv_text().await?;
            match serde_json::from_str(&text) {
                Ok(msg) => return Some(msg),
                Err(e) => warn!(error = %e, "memory peer got malformed frame"),
            }
        }
    }

    /// Returns false if the socket is already closed.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match serde_json::to_string(msg) {
            Ok(text) => self.send_raw(text),
            Err(e) => {
                warn!(error = %e, "failed to encode server message");
                false
            }
        }
    }

    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        match &self.outbound {
            Some(tx) => tx.unbounded_send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Close the server side; the client sees its stream end.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!("memory peer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.as_ref().is_none_or(|tx| tx.is_closed())
    }
}
