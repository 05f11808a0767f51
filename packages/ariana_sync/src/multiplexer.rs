//! Subscription multiplexer.
//!
//! Many handlers share one logical subscription per (channel, params) key.
//! Only the first handler for a key causes a subscribe, only the last one
//! leaving causes an unsubscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::protocol::{
    Channel, ClientMessage, Params, ServerMessage, SubscriptionKey, subscription_key,
};

/// Callback invoked for every snapshot/delta routed to its key.
pub type MessageHandler = Box<dyn FnMut(&ServerMessage) + Send + 'static>;

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

/// Generates `req-<counter>-<unix millis>` ids.
#[derive(Debug, Default)]
pub struct RequestIds {
    counter: AtomicU64,
}

impl RequestIds {
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req-{}-{}", n, chrono::Utc::now().timestamp_millis())
    }
}

struct Subscription {
    channel: Channel,
    params: Params,
    request_id: String,
    /// Subscribe message sent on the current authenticated connection.
    active: bool,
    handlers: Vec<(HandlerId, MessageHandler)>,
}

#[derive(Default)]
pub struct Multiplexer {
    subscriptions: HashMap<SubscriptionKey, Subscription>,
    handler_keys: HashMap<HandlerId, SubscriptionKey>,
    request_ids: RequestIds,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under (channel, params). Returns the subscribe
    /// message to send when this created a new subscription and the
    /// connection is up.
    pub fn subscribe(
        &mut self,
        channel: Channel,
        params: Params,
        id: HandlerId,
        handler: MessageHandler,
        connected: bool,
    ) -> Option<ClientMessage> {
        let key = subscription_key(channel, &params);
        self.handler_keys.insert(id, key.clone());

        if let Some(existing) = self.subscriptions.get_mut(&key) {
            existing.handlers.push((id, handler));
            debug!(%key, handlers = existing.handlers.len(), "joined existing subscription");
            return None;
        }

        let request_id = self.request_ids.next();
        debug!(%key, %request_id, "new subscription");
        let msg = connected.then(|| ClientMessage::Subscribe {
            channel,
            params: params.clone(),
            request_id: request_id.clone(),
        });
        self.subscriptions.insert(
            key,
            Subscription {
                channel,
                params,
                request_id,
                active: connected,
                handlers: vec![(id, handler)],
            },
        );
        msg
    }

    /// Remove one handler. Returns the unsubscribe message when it was the last
    /// handler for its key and the connection is up.
    pub fn unsubscribe(&mut self, id: HandlerId, connected: bool) -> Option<ClientMessage> {
        let key = self.handler_keys.remove(&id)?;
        let sub = self.subscriptions.get_mut(&key)?;
        sub.handlers.retain(|(h, _)| *h != id);
        if !sub.handlers.is_empty() {
            return None;
        }

        let sub = self.subscriptions.remove(&key)?;
        debug!(%key, "last handler gone, dropping subscription");
        connected.then_some(ClientMessage::Unsubscribe {
            channel: sub.channel,
            params: sub.params,
        })
    }

    /// Fresh subscribe messages for every tracked subscription, one each.
    pub fn resume(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::with_capacity(self.subscriptions.len());
        for (key, sub) in self.subscriptions.iter_mut() {
            sub.request_id = self.request_ids.next();
            sub.active = true;
            debug!(%key, request_id = %sub.request_id, "resuming subscription");
            messages.push(ClientMessage::Subscribe {
                channel: sub.channel,
                params: sub.params.clone(),
                request_id: sub.request_id.clone(),
            });
        }
        messages
    }

    pub fn mark_inactive(&mut self) {
        for sub in self.subscriptions.values_mut() {
            sub.active = false;
        }
    }

    /// Deliver a snapshot/delta to every handler registered for its key.
    /// Returns how many handlers saw it; zero means the message was dropped.
    pub fn route(&mut self, msg: &ServerMessage) -> usize {
        let Some(key) = msg.subscription_key() else {
            return 0;
        };
        let Some(sub) = self.subscriptions.get_mut(&key) else {
            debug!(%key, kind = msg.kind(), "no subscription for message, dropping");
            return 0;
        };
        for (_, handler) in sub.handlers.iter_mut() {
            handler(msg);
        }
        sub.handlers.len()
    }

    pub fn keep_alive(&self, agent_ids: Vec<String>, connected: bool) -> Option<ClientMessage> {
        if !connected || agent_ids.is_empty() {
            return None;
        }
        Some(ClientMessage::KeepAlive {
            agent_ids,
            request_id: Some(self.request_ids.next()),
        })
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn handler_count(&self, key: &SubscriptionKey) -> usize {
        self.subscriptions
            .get(key)
            .map(|s| s.handlers.len())
            .unwrap_or(0)
    }

    pub fn request_id(&self, key: &SubscriptionKey) -> Option<&str> {
        self.subscriptions.get(key).map(|s| s.request_id.as_str())
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.subscriptions.get(key).is_some_and(|s| s.active)
    }
}
