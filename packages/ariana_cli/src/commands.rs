//! One function per subcommand. Each holds its store interest for as long as
//! it runs and prints a JSON line per change.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use ariana_sync::config::EventsConfig;
use ariana_sync::connection::ConnectionState;
use ariana_sync::{AgentEventsStore, AgentScope, AgentsStore, ProjectsStore, SyncClient};

use crate::signals::{self, Resumed};

pub async fn projects(client: &SyncClient) -> Result<()> {
    let store = ProjectsStore::new(client.clone());
    let _interest = store.subscribe();
    follow(client, store.watch(), |s| {
        json!({
            "kind": "projects",
            "loading": s.loading,
            "projects": s.projects.items(),
        })
    })
    .await
}

pub async fn agents(client: &SyncClient, project: Option<String>) -> Result<()> {
    let store = AgentsStore::new(client.clone());
    let scope = match project {
        Some(id) => AgentScope::Project(id),
        None => AgentScope::All,
    };
    let _interest = store.subscribe(scope);
    follow(client, store.watch(), |s| {
        json!({
            "kind": "agents",
            "loading": s.loading,
            "agents": s.agents.items(),
        })
    })
    .await
}

pub async fn events(
    client: &SyncClient,
    config: EventsConfig,
    agent_id: &str,
    older_pages: u32,
) -> Result<()> {
    let store = AgentEventsStore::new(client.clone(), config);
    store.set_focused_agent(Some(agent_id));

    let mut pages_left = older_pages;
    let pager = store.clone();
    let result = follow(client, store.watch(), |s| {
        if pages_left > 0
            && s.has_more(agent_id)
            && !s.is_loading_more(agent_id)
            && pager.load_older_events(agent_id)
        {
            pages_left -= 1;
        }
        json!({
            "kind": "events",
            "agentId": agent_id,
            "hasMore": s.has_more(agent_id),
            "loadingMore": s.is_loading_more(agent_id),
            "events": s.events(agent_id),
        })
    })
    .await;

    store.cleanup();
    result
}

pub async fn keep_alive(
    client: &SyncClient,
    agent_ids: Vec<String>,
    interval_secs: u64,
) -> Result<()> {
    let mut resumed = Resumed::install()?;
    let mut connection = client.watch_state();
    let interrupted = signals::interrupted();
    tokio::pin!(interrupted);

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    emit(&connection_line(*connection.borrow_and_update()))?;
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                return Ok(());
            }
            _ = resumed.recv() => client.notify_foreground(),
            changed = connection.changed() => {
                changed.context("Sync client stopped")?;
                emit(&connection_line(*connection.borrow_and_update()))?;
            }
            _ = ticker.tick() => {
                // Sent only while live; the server would drop it anyway.
                if client.state() == ConnectionState::Connected {
                    client.send_keep_alive(agent_ids.clone());
                    emit(&json!({ "kind": "keep-alive", "agentIds": agent_ids }))?;
                }
            }
        }
    }
}

/// Print connection changes and every new store state until Ctrl-C.
async fn follow<T: Clone>(
    client: &SyncClient,
    mut store: watch::Receiver<T>,
    mut render: impl FnMut(&T) -> Value,
) -> Result<()> {
    let mut resumed = Resumed::install()?;
    let mut connection = client.watch_state();
    let interrupted = signals::interrupted();
    tokio::pin!(interrupted);

    emit(&connection_line(*connection.borrow_and_update()))?;
    // Clone out of the channel: `render` may write back into the store.
    let state = store.borrow_and_update().clone();
    emit(&render(&state))?;

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                return Ok(());
            }
            _ = resumed.recv() => client.notify_foreground(),
            changed = connection.changed() => {
                changed.context("Sync client stopped")?;
                emit(&connection_line(*connection.borrow_and_update()))?;
            }
            changed = store.changed() => {
                changed.context("Store dropped")?;
                let state = store.borrow_and_update().clone();
                emit(&render(&state))?;
            }
        }
    }
}

fn connection_line(state: ConnectionState) -> Value {
    json!({ "kind": "connection", "state": state, "label": state.label() })
}

fn emit(line: &Value) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, line).context("Failed to encode output line")?;
    writeln!(out).context("Failed to write to stdout")?;
    Ok(())
}
