use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

use super::{Interest, Scopes, lock};
use crate::client::SyncClient;
use crate::models::Project;
use crate::protocol::{Channel, Params, ServerMessage};
use crate::reconcile::FlatCollection;

#[derive(Debug, Clone, Default)]
pub struct ProjectsState {
    pub projects: FlatCollection<Project>,
    /// Subscribed but no snapshot yet.
    pub loading: bool,
    pub subscribed: bool,
}

/// The user's projects, kept in sync over `projects-list`.
#[derive(Clone)]
pub struct ProjectsStore {
    inner: Arc<Inner>,
}

struct Inner {
    client: SyncClient,
    state: Arc<watch::Sender<ProjectsState>>,
    scopes: Mutex<Scopes<()>>,
}

impl ProjectsStore {
    pub fn new(client: SyncClient) -> Self {
        let (state, _) = watch::channel(ProjectsState::default());
        Self {
            inner: Arc::new(Inner {
                client,
                state: Arc::new(state),
                scopes: Mutex::new(Scopes::default()),
            }),
        }
    }

    pub fn state(&self) -> ProjectsState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ProjectsState> {
        self.inner.state.subscribe()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.inner.state.borrow().projects.items().to_vec()
    }

    /// Keep the list live for as long as the returned interest is held.
    pub fn subscribe(&self) -> Interest {
        let mut scopes = lock(&self.inner.scopes);
        scopes.acquire((), || {
            debug!("subscribing to projects");
            self.inner.state.send_modify(|s| {
                s.loading = true;
                s.subscribed = true;
            });
            let state = self.inner.state.clone();
            self.inner
                .client
                .subscribe(Channel::ProjectsList, Params::new(), move |msg| {
                    apply(&state, msg)
                })
        });
        drop(scopes);

        let inner = self.inner.clone();
        Interest::new(move || inner.release())
    }
}

impl Inner {
    fn release(&self) {
        let Some(subscription) = lock(&self.scopes).release(&()) else {
            return;
        };
        drop(subscription);
        debug!("projects released");
        // Last known projects stay visible.
        self.state.send_modify(|s| {
            s.loading = false;
            s.subscribed = false;
        });
    }
}

fn apply(state: &watch::Sender<ProjectsState>, msg: &ServerMessage) {
    match msg {
        ServerMessage::Snapshot { data, .. } => state.send_modify(|s| {
            s.projects.apply_snapshot(data);
            s.loading = false;
        }),
        ServerMessage::Delta { data, .. } => {
            state.send_if_modified(|s| s.projects.apply_delta(&data.op));
        }
        _ => {}
    }
}
