//! Agent event logs.
//!
//! One agent is focused at a time; only the focused agent has a live
//! `agent-events` subscription. Logs are kept per agent so switching focus
//! back shows the last known events until the fresh snapshot lands.
//!
//! Older history is fetched by re-subscribing with a larger `limit`, never by
//! a separate request. One such expansion may be in flight per agent.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

use super::lock;
use crate::client::{Subscription, SyncClient};
use crate::config::EventsConfig;
use crate::models::{ChatEvent, PromptStatus};
use crate::protocol::{Channel, Params, ServerMessage};
use crate::reconcile::EventLog;

#[derive(Debug, Clone, Default)]
pub struct AgentEventsState {
    pub focused_agent: Option<String>,
    pub logs: HashMap<String, EventLog>,
    pub loading_more: HashSet<String>,
}

impl AgentEventsState {
    pub fn events(&self, agent_id: &str) -> &[ChatEvent] {
        self.logs
            .get(agent_id)
            .map(|log| log.events())
            .unwrap_or_default()
    }

    pub fn has_more(&self, agent_id: &str) -> bool {
        self.logs.get(agent_id).is_some_and(|log| log.has_more())
    }

    pub fn is_loading_more(&self, agent_id: &str) -> bool {
        self.loading_more.contains(agent_id)
    }
}

struct Focus {
    agent_id: String,
    limit: u32,
    _subscription: Subscription,
}

#[derive(Clone)]
pub struct AgentEventsStore {
    inner: Arc<Inner>,
}

struct Inner {
    client: SyncClient,
    config: EventsConfig,
    state: Arc<watch::Sender<AgentEventsState>>,
    focus: Mutex<Option<Focus>>,
}

impl AgentEventsStore {
    pub fn new(client: SyncClient, config: EventsConfig) -> Self {
        let (state, _) = watch::channel(AgentEventsState::default());
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                state: Arc::new(state),
                focus: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> AgentEventsState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AgentEventsState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self, agent_id: &str) -> Vec<ChatEvent> {
        self.inner.state.borrow().events(agent_id).to_vec()
    }

    pub fn focused_agent(&self) -> Option<String> {
        self.inner.state.borrow().focused_agent.clone()
    }

    /// Window size of the focused agent's subscription.
    pub fn limit(&self) -> Option<u32> {
        lock(&self.inner.focus).as_ref().map(|f| f.limit)
    }

    /// Move the live subscription to `agent_id`, or drop it with `None`.
    pub fn set_focused_agent(&self, agent_id: Option<&str>) {
        let mut focus = lock(&self.inner.focus);
        if focus.as_ref().map(|f| f.agent_id.as_str()) == agent_id {
            return;
        }
        *focus = None;

        self.inner.state.send_modify(|s| {
            s.focused_agent = agent_id.map(str::to_string);
            if let Some(id) = agent_id {
                s.logs.entry(id.to_string()).or_default();
            }
        });

        if let Some(agent_id) = agent_id {
            debug!(%agent_id, "focusing agent");
            let limit = self.inner.config.default_limit;
            *focus = Some(self.inner.open_window(agent_id, limit));
        }
    }

    /// Ask for `page_increment` more events. Returns false without doing
    /// anything when `agent_id` is not focused, an expansion is already in
    /// flight, the server reported no more history, or the window is at its
    /// ceiling.
    pub fn load_older_events(&self, agent_id: &str) -> bool {
        let mut focus = lock(&self.inner.focus);
        let Some(current) = focus.as_ref().filter(|f| f.agent_id == agent_id) else {
            return false;
        };
        {
            let state = self.inner.state.borrow();
            if state.is_loading_more(agent_id) || !state.has_more(agent_id) {
                return false;
            }
        }
        let Some(limit) = self.inner.config.next_limit(current.limit) else {
            return false;
        };

        debug!(%agent_id, limit, "loading older events");
        self.inner.state.send_modify(|s| {
            s.loading_more.insert(agent_id.to_string());
        });
        // Unsubscribe the old window before asking for the new one.
        *focus = None;
        *focus = Some(self.inner.open_window(agent_id, limit));
        true
    }

    /// Show `text` as a pending prompt right away. Returns its temporary id.
    pub fn add_optimistic_prompt(&self, agent_id: &str, text: impl Into<String>) -> String {
        let prompt = ChatEvent::optimistic_prompt(text);
        let id = prompt.id.clone();
        self.inner.state.send_modify(|s| {
            s.logs
                .entry(agent_id.to_string())
                .or_default()
                .add_optimistic(prompt);
        });
        id
    }

    pub fn update_prompt_status(
        &self,
        agent_id: &str,
        prompt_id: &str,
        status: PromptStatus,
    ) -> bool {
        self.inner.state.send_if_modified(|s| {
            s.logs
                .get_mut(agent_id)
                .is_some_and(|log| log.set_prompt_status(prompt_id, status))
        })
    }

    pub fn remove_optimistic_prompt(&self, agent_id: &str, prompt_id: &str) -> bool {
        self.inner.state.send_if_modified(|s| {
            s.logs
                .get_mut(agent_id)
                .is_some_and(|log| log.remove_optimistic(prompt_id))
        })
    }

    /// Run `submit` with an optimistic prompt on screen: `queued` once it
    /// succeeds, `failed` (and kept) if it errors. The result is passed
    /// through untouched.
    pub async fn submit_prompt<F, T, E>(
        &self,
        agent_id: &str,
        text: impl Into<String>,
        submit: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let prompt_id = self.add_optimistic_prompt(agent_id, text);
        let result = submit.await;
        let status = match result {
            Ok(_) => PromptStatus::Queued,
            Err(_) => PromptStatus::Failed,
        };
        self.update_prompt_status(agent_id, &prompt_id, status);
        result
    }

    /// Drop the focus and forget every cached log.
    pub fn cleanup(&self) {
        let mut focus = lock(&self.inner.focus);
        *focus = None;
        self.inner.state.send_replace(AgentEventsState::default());
    }
}

impl Inner {
    fn open_window(&self, agent_id: &str, limit: u32) -> Focus {
        let state = self.state.clone();
        let owner = agent_id.to_string();
        let subscription = self.client.subscribe(
            Channel::AgentEvents,
            window_params(agent_id, limit),
            move |msg| apply(&state, &owner, msg),
        );
        Focus {
            agent_id: agent_id.to_string(),
            limit,
            _subscription: subscription,
        }
    }
}

fn window_params(agent_id: &str, limit: u32) -> Params {
    let mut params = Params::new();
    params.insert("agentId".into(), json!(agent_id));
    params.insert("limit".into(), json!(limit));
    params
}

fn apply(state: &watch::Sender<AgentEventsState>, agent_id: &str, msg: &ServerMessage) {
    match msg {
        ServerMessage::Snapshot { data, .. } => {
            state.send_if_modified(|s| {
                let applied = s
                    .logs
                    .entry(agent_id.to_string())
                    .or_default()
                    .apply_snapshot(data);
                if applied {
                    s.loading_more.remove(agent_id);
                }
                applied
            });
        }
        ServerMessage::Delta { data, .. } => {
            state.send_if_modified(|s| {
                s.logs
                    .entry(agent_id.to_string())
                    .or_default()
                    .apply_delta(&data.op)
            });
        }
        _ => {}
    }
}
