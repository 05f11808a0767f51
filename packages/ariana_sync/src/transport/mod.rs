//! Socket connectors.
//!
//! The client actor never touches a concrete socket type. It asks a
//! [`Connector`] for a [`Socket`]: a sink of outbound text frames and a stream
//! of inbound ones.

mod memory;
mod ws;

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer, memory_pair};
pub use ws::WsConnector;

use futures::future::BoxFuture;
use futures::{Sink, Stream};
use std::pin::Pin;

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open socket, already split into halves.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Socket {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens sockets on demand. Called once per connection attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<Socket, TransportError>>;
}
