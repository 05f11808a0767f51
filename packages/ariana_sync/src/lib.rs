//! Ariana Sync
//!
//! Real-time subscription transport for the Ariana agent backend: one
//! authenticated WebSocket, many deduplicated channel subscriptions, and
//! snapshot + delta reconciliation into observable stores.
//!
//! Layers, bottom up:
//! - [`protocol`]: wire messages and subscription keys
//! - [`connection`], [`multiplexer`], [`session`]: sans-IO state machines
//! - [`client`]: the actor that drives a session over a real socket
//! - [`reconcile`], [`stores`]: materialized collections consumers read

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod multiplexer;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod stores;
pub mod transport;

pub use client::{Subscription, SyncClient};
pub use config::SyncConfig;
pub use connection::ConnectionState;
pub use error::{ConfigError, TransportError};
pub use protocol::{Channel, ClientMessage, Params, ServerMessage, subscription_key};
pub use stores::{AgentEventsStore, AgentScope, AgentsStore, Interest, ProjectsStore};
pub use transport::{Connector, MemoryConnector, MemoryServer, WsConnector, memory_pair};
