use serde_json::Value;
use std::collections::HashSet;

use super::{Entity, decode_many, decode_one, list_payload};
use crate::models::{ChatEvent, PromptStatus};
use crate::protocol::DeltaOp;

/// One agent's conversation, ordered by timestamp.
///
/// Server events and optimistic local prompts are kept apart and merged into
/// `events` after every mutation. An optimistic prompt disappears as soon as a
/// server prompt with the same text shows up, whether it arrives in a snapshot
/// or a delta.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    server: Vec<ChatEvent>,
    optimistic: Vec<ChatEvent>,
    events: Vec<ChatEvent>,
    has_more: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merged view, ascending by timestamp.
    pub fn events(&self) -> &[ChatEvent] {
        &self.events
    }

    pub fn optimistic(&self) -> &[ChatEvent] {
        &self.optimistic
    }

    /// Older events exist server-side beyond the current window.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Apply a `{events: [..], hasMore?}` snapshot. Returns false, leaving the
    /// log untouched, when the payload carries no event list.
    pub fn apply_snapshot(&mut self, data: &Value) -> bool {
        let Some(Value::Array(raw)) = data.get(ChatEvent::COLLECTION) else {
            return false;
        };
        if let Some(has_more) = data.get("hasMore").and_then(Value::as_bool) {
            self.has_more = has_more;
        }
        self.reset_server(decode_many(raw));
        true
    }

    /// Returns whether the log changed.
    pub fn apply_delta(&mut self, op: &DeltaOp) -> bool {
        match op {
            DeltaOp::Add { item } => {
                let added = decode_one(item).into_iter().collect();
                self.add_server(added)
            }
            DeltaOp::AddBatch { items } => self.add_server(decode_many(items)),
            DeltaOp::Modify { item_id, item, .. } => {
                let Some(updated) = item.as_ref().and_then(decode_one::<ChatEvent>) else {
                    return false;
                };
                let Some(slot) = self.server.iter_mut().find(|e| e.id == *item_id) else {
                    return false;
                };
                *slot = updated;
                self.rebuild();
                true
            }
            DeltaOp::Delete { item_id } => {
                let before = self.server.len();
                self.server.retain(|e| e.id != *item_id);
                if self.server.len() == before {
                    return false;
                }
                self.rebuild();
                true
            }
            DeltaOp::Replace { item } => {
                self.reset_server(list_payload(item));
                true
            }
        }
    }

    pub fn add_optimistic(&mut self, event: ChatEvent) {
        self.optimistic.push(event);
        self.rebuild();
    }

    /// Set the status of the prompt with `id`. Returns false if there is none.
    pub fn set_prompt_status(&mut self, id: &str, status: PromptStatus) -> bool {
        let mut found = false;
        for event in self.optimistic.iter_mut().chain(self.server.iter_mut()) {
            if event.id == id {
                found |= event.set_prompt_status(status);
            }
        }
        if found {
            self.rebuild();
        }
        found
    }

    pub fn remove_optimistic(&mut self, id: &str) -> bool {
        let before = self.optimistic.len();
        self.optimistic.retain(|e| e.id != id);
        if self.optimistic.len() == before {
            return false;
        }
        self.rebuild();
        true
    }

    fn reset_server(&mut self, incoming: Vec<ChatEvent>) {
        self.supersede(&incoming);
        self.server = incoming;
        self.rebuild();
    }

    fn add_server(&mut self, candidates: Vec<ChatEvent>) -> bool {
        let mut seen: HashSet<String> = self
            .server
            .iter()
            .chain(self.optimistic.iter())
            .map(|e| e.id.clone())
            .collect();
        let fresh: Vec<ChatEvent> = candidates
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        if fresh.is_empty() {
            return false;
        }
        self.supersede(&fresh);
        self.server.extend(fresh);
        self.rebuild();
        true
    }

    /// Drop optimistic prompts that a server event now stands in for.
    fn supersede(&mut self, server_events: &[ChatEvent]) {
        self.optimistic
            .retain(|local| !server_events.iter().any(|e| e.is_same_prompt(local)));
    }

    fn rebuild(&mut self) {
        let mut merged = Vec::with_capacity(self.server.len() + self.optimistic.len());
        merged.extend(self.server.iter().cloned());
        merged.extend(self.optimistic.iter().cloned());
        merged.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.events = merged;
    }
}
