use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

use super::{Interest, Scopes, lock};
use crate::client::SyncClient;
use crate::models::Agent;
use crate::protocol::{Channel, Params, ServerMessage};
use crate::reconcile::{FlatCollection, list_payload};

/// Which slice of the agents list a subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentScope {
    All,
    Project(String),
}

impl AgentScope {
    pub fn params(&self) -> Params {
        let mut params = Params::new();
        if let AgentScope::Project(id) = self {
            params.insert("projectId".into(), json!(id));
        }
        params
    }

    fn covers(&self, agent: &Agent) -> bool {
        match self {
            AgentScope::All => true,
            AgentScope::Project(id) => agent.project_id.as_deref() == Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentsState {
    pub agents: FlatCollection<Agent>,
    pub loading: bool,
}

impl AgentsState {
    pub fn for_project(&self, project_id: &str) -> Vec<&Agent> {
        self.agents
            .items()
            .iter()
            .filter(|a| a.project_id.as_deref() == Some(project_id))
            .collect()
    }
}

/// Agents list over `agents-list`, either everything or per project.
#[derive(Clone)]
pub struct AgentsStore {
    inner: Arc<Inner>,
}

struct Inner {
    client: SyncClient,
    state: Arc<watch::Sender<AgentsState>>,
    scopes: Mutex<Scopes<AgentScope>>,
}

impl AgentsStore {
    pub fn new(client: SyncClient) -> Self {
        let (state, _) = watch::channel(AgentsState::default());
        Self {
            inner: Arc::new(Inner {
                client,
                state: Arc::new(state),
                scopes: Mutex::new(Scopes::default()),
            }),
        }
    }

    pub fn state(&self) -> AgentsState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AgentsState> {
        self.inner.state.subscribe()
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.inner.state.borrow().agents.items().to_vec()
    }

    pub fn is_subscribed(&self, scope: &AgentScope) -> bool {
        lock(&self.inner.scopes).contains(scope)
    }

    pub fn subscribe_all(&self) -> Interest {
        self.subscribe(AgentScope::All)
    }

    pub fn subscribe_to_project(&self, project_id: impl Into<String>) -> Interest {
        self.subscribe(AgentScope::Project(project_id.into()))
    }

    pub fn subscribe(&self, scope: AgentScope) -> Interest {
        let mut scopes = lock(&self.inner.scopes);
        scopes.acquire(scope.clone(), || {
            debug!(?scope, "subscribing to agents");
            self.inner.state.send_modify(|s| s.loading = true);
            let state = self.inner.state.clone();
            let handler_scope = scope.clone();
            self.inner
                .client
                .subscribe(Channel::AgentsList, scope.params(), move |msg| {
                    apply(&state, &handler_scope, msg)
                })
        });
        drop(scopes);

        let inner = self.inner.clone();
        Interest::new(move || inner.release(&scope))
    }
}

impl Inner {
    fn release(&self, scope: &AgentScope) {
        let mut scopes = lock(&self.scopes);
        let Some(subscription) = scopes.release(scope) else {
            return;
        };
        drop(subscription);
        let idle = scopes.is_empty();
        drop(scopes);

        debug!(?scope, "agents scope released");
        self.state.send_modify(|s| {
            if *scope == AgentScope::All {
                s.agents.clear();
            }
            if idle {
                s.loading = false;
            }
        });
    }
}

fn apply(state: &watch::Sender<AgentsState>, scope: &AgentScope, msg: &ServerMessage) {
    match msg {
        ServerMessage::Snapshot { data, .. } => {
            let incoming: Vec<Agent> = list_payload(data);
            state.send_modify(|s| {
                s.agents.replace_where(|a| scope.covers(a), incoming);
                s.loading = false;
            });
        }
        ServerMessage::Delta { data, .. } => {
            state.send_if_modified(|s| s.agents.apply_delta(&data.op));
        }
        _ => {}
    }
}
