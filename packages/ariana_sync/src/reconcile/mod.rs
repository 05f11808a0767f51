//! Snapshot + delta reconciliation.
//!
//! Two policies live here: [`FlatCollection`] for keyed, unordered entity
//! lists (agents, projects) and [`EventLog`] for the timestamp-ordered chat
//! log with optimistic local entries.

mod event_log;
mod flat;

pub use event_log::EventLog;
pub use flat::FlatCollection;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::models::{Agent, ChatEvent, Project};

/// Anything reconciled by id.
pub trait Entity: Clone + Serialize + DeserializeOwned {
    /// Field that wraps the list in object-shaped payloads, e.g. `{"agents": [..]}`.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

impl Entity for Agent {
    const COLLECTION: &'static str = "agents";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Project {
    const COLLECTION: &'static str = "projects";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for ChatEvent {
    const COLLECTION: &'static str = "events";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Decode one entity, logging and skipping it if malformed.
pub(crate) fn decode_one<T: Entity>(value: &Value) -> Option<T> {
    match T::deserialize(value) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!(collection = T::COLLECTION, error = %e, "skipping malformed entity");
            None
        }
    }
}

pub(crate) fn decode_many<T: Entity>(values: &[Value]) -> Vec<T> {
    values.iter().filter_map(decode_one).collect()
}

/// A list payload: either a bare array or `{"<collection>": [..]}`.
/// Anything else decodes to an empty list.
pub(crate) fn list_payload<T: Entity>(data: &Value) -> Vec<T> {
    match data {
        Value::Array(values) => decode_many(values),
        Value::Object(map) => match map.get(T::COLLECTION) {
            Some(Value::Array(values)) => decode_many(values),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
