//! End-to-end client tests: the real actor against an in-memory backend.
//!
//! The test plays the server through `MemoryPeer`, so every frame the client
//! sends is observed exactly as it would go over the wire.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use ariana_sync::backoff::Backoff;
use ariana_sync::config::EventsConfig;
use ariana_sync::models::PromptStatus;
use ariana_sync::protocol::{ErrorPayload, AUTHENTICATION_FAILED};
use ariana_sync::transport::MemoryPeer;
use ariana_sync::{
    AgentEventsStore, AgentsStore, Channel, ClientMessage, ConnectionState, MemoryServer, Params,
    ProjectsStore, ServerMessage, SyncClient, memory_pair,
};

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn fast_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(10), Duration::from_millis(40))
}

fn params(value: serde_json::Value) -> Params {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("params must be an object"),
    }
}

async fn wait_for_state(client: &SyncClient, want: ConnectionState) {
    let mut rx = client.watch_state();
    timeout(TEST_TIMEOUT, rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for connection state")
        .expect("client actor stopped");
}

async fn accept(server: &mut MemoryServer) -> MemoryPeer {
    timeout(TEST_TIMEOUT, server.accept())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

async fn recv(peer: &mut MemoryPeer) -> ClientMessage {
    timeout(TEST_TIMEOUT, peer.recv())
        .await
        .expect("timed out waiting for a client message")
        .expect("client closed the socket")
}

/// Accept the next connection, check the token and authenticate it.
async fn accept_authenticated(server: &mut MemoryServer, client: &SyncClient) -> MemoryPeer {
    let mut peer = accept(server).await;
    match recv(&mut peer).await {
        ClientMessage::Authenticate { token } => assert_eq!(token, "tok"),
        other => panic!("expected authenticate, got {other:?}"),
    }
    peer.send(&ServerMessage::Authenticated {
        user_id: "user-1".into(),
    });
    wait_for_state(client, ConnectionState::Connected).await;
    peer
}

async fn connected_client() -> (SyncClient, MemoryServer, MemoryPeer) {
    let (connector, mut server) = memory_pair();
    let client = SyncClient::spawn_with_backoff(connector, fast_backoff());
    client.connect("tok");
    let peer = accept_authenticated(&mut server, &client).await;
    (client, server, peer)
}

fn subscribe_request_id(msg: &ClientMessage) -> String {
    match msg {
        ClientMessage::Subscribe { request_id, .. } => request_id.clone(),
        other => panic!("expected subscribe, got {other:?}"),
    }
}

/// Round-trip a ping so every frame sent before it has been processed.
async fn sync(peer: &mut MemoryPeer, ts: i64) {
    peer.send(&ServerMessage::Ping { timestamp: ts.into() });
    assert_eq!(recv(peer).await, ClientMessage::Pong { timestamp: ts.into() });
}

async fn wait_until<T: Clone>(
    rx: &mut tokio::sync::watch::Receiver<T>,
    what: &str,
    pred: impl FnMut(&T) -> bool,
) -> T {
    timeout(TEST_TIMEOUT, rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("store dropped")
        .clone()
}

// --- Connection lifecycle ---

#[tokio::test]
async fn ping_is_answered_with_matching_pong() {
    let (_client, _server, mut peer) = connected_client().await;
    peer.send(&ServerMessage::Ping { timestamp: 12345.into() });
    assert_eq!(
        recv(&mut peer).await,
        ClientMessage::Pong { timestamp: 12345.into() }
    );
}

#[tokio::test]
async fn reconnects_with_backoff_after_server_drop() {
    let (client, mut server, mut peer) = connected_client().await;
    peer.close();

    let _peer = accept_authenticated(&mut server, &client).await;
    assert_eq!(server.attempts(), 2);
}

#[tokio::test]
async fn keeps_retrying_while_refused() {
    let (connector, mut server) = memory_pair();
    server.refuse_connections(true);
    let client = SyncClient::spawn_with_backoff(connector, fast_backoff());
    client.connect("tok");

    timeout(TEST_TIMEOUT, async {
        while server.attempts() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client stopped retrying");
    assert_ne!(client.state(), ConnectionState::Connected);

    server.refuse_connections(false);
    let _peer = accept_authenticated(&mut server, &client).await;
}

#[tokio::test]
async fn auth_failure_stops_reconnecting() {
    let (connector, mut server) = memory_pair();
    let client = SyncClient::spawn_with_backoff(connector, fast_backoff());
    client.connect("tok");
    let mut peer = accept(&mut server).await;
    recv(&mut peer).await;
    peer.send(&ServerMessage::Error {
        request_id: None,
        error: ErrorPayload {
            code: AUTHENTICATION_FAILED.into(),
            message: "bad token".into(),
        },
    });

    assert!(timeout(TEST_TIMEOUT, peer.recv_text()).await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // A fresh connect starts over.
    client.connect("tok");
    let _peer = accept_authenticated(&mut server, &client).await;
}

#[tokio::test]
async fn disconnect_is_terminal_until_connect() {
    let (client, mut server, mut peer) = connected_client().await;
    client.disconnect();
    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert!(timeout(TEST_TIMEOUT, peer.recv_text()).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.attempts(), 1);

    client.connect("tok");
    let _peer = accept_authenticated(&mut server, &client).await;
}

#[tokio::test]
async fn force_reconnect_replaces_the_socket() {
    let (client, mut server, mut old) = connected_client().await;
    client.force_reconnect();
    let _new = accept_authenticated(&mut server, &client).await;
    assert!(timeout(TEST_TIMEOUT, old.recv_text()).await.unwrap().is_none());
}

#[tokio::test]
async fn token_change_restarts_connection() {
    let (client, mut server, mut old) = connected_client().await;
    client.connect("tok");
    sync(&mut old, 1).await;
    assert_eq!(server.attempts(), 1);

    client.connect("other");
    let mut peer = accept(&mut server).await;
    assert_eq!(
        recv(&mut peer).await,
        ClientMessage::Authenticate {
            token: "other".into()
        }
    );
    assert!(timeout(TEST_TIMEOUT, old.recv_text()).await.unwrap().is_none());
}

#[tokio::test]
async fn foreground_skips_pending_backoff() {
    let (connector, mut server) = memory_pair();
    let client = SyncClient::spawn_with_backoff(
        connector,
        Backoff::new(Duration::from_secs(60), Duration::from_secs(60)),
    );
    client.connect("tok");
    let mut peer = accept_authenticated(&mut server, &client).await;

    peer.close();
    wait_for_state(&client, ConnectionState::Disconnected).await;
    client.notify_foreground();
    let _peer = accept_authenticated(&mut server, &client).await;
}

// --- Subscriptions ---

#[tokio::test]
async fn shared_subscription_sends_one_message_and_fans_out() {
    let (client, _server, mut peer) = connected_client().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tx2 = tx.clone();

    let a = client.subscribe(
        Channel::AgentsList,
        params(json!({ "projectId": "p1", "archived": false })),
        move |msg| {
            let _ = tx.send(("a", msg.clone()));
        },
    );
    let b = client.subscribe(
        Channel::AgentsList,
        params(json!({ "archived": false, "projectId": "p1" })),
        move |msg| {
            let _ = tx2.send(("b", msg.clone()));
        },
    );
    assert_eq!(a.key(), b.key());

    assert!(matches!(
        recv(&mut peer).await,
        ClientMessage::Subscribe { .. }
    ));
    peer.send_raw(
        r#"{"type":"snapshot","channel":"agents-list","params":{"projectId":"p1","archived":false},"requestId":"x","data":[]}"#,
    );
    sync(&mut peer, 1).await;

    let mut seen = vec![rx.recv().await.unwrap().0, rx.recv().await.unwrap().0];
    seen.sort_unstable();
    assert_eq!(seen, ["a", "b"]);

    drop(a);
    sync(&mut peer, 2).await;
    drop(b);
    assert_eq!(
        recv(&mut peer).await,
        ClientMessage::Unsubscribe {
            channel: Channel::AgentsList,
            params: params(json!({ "projectId": "p1", "archived": false })),
        }
    );
}

#[tokio::test]
async fn subscriptions_replay_after_reconnect_with_new_ids() {
    let (client, mut server, mut peer) = connected_client().await;
    let _projects = client.subscribe(Channel::ProjectsList, Params::new(), |_| {});
    let _events = client.subscribe(
        Channel::AgentEvents,
        params(json!({ "agentId": "a1", "limit": 80 })),
        |_| {},
    );
    let mut before = vec![
        subscribe_request_id(&recv(&mut peer).await),
        subscribe_request_id(&recv(&mut peer).await),
    ];
    before.sort();

    peer.close();
    let mut peer = accept_authenticated(&mut server, &client).await;
    let mut after = vec![
        subscribe_request_id(&recv(&mut peer).await),
        subscribe_request_id(&recv(&mut peer).await),
    ];
    after.sort();
    sync(&mut peer, 1).await;

    for id in &after {
        assert!(!before.contains(id), "request id {id} reused");
    }
}

#[tokio::test]
async fn subscribe_while_offline_is_sent_after_auth() {
    let (connector, mut server) = memory_pair();
    let client = SyncClient::spawn_with_backoff(connector, fast_backoff());
    let _sub = client.subscribe(Channel::ProjectsList, Params::new(), |_| {});
    client.connect("tok");
    let mut peer = accept_authenticated(&mut server, &client).await;
    assert!(matches!(
        recv(&mut peer).await,
        ClientMessage::Subscribe {
            channel: Channel::ProjectsList,
            ..
        }
    ));
}

#[tokio::test]
async fn keep_alive_carries_request_id() {
    let (client, _server, mut peer) = connected_client().await;
    client.send_keep_alive(vec!["a1".into(), "a2".into()]);
    match recv(&mut peer).await {
        ClientMessage::KeepAlive {
            agent_ids,
            request_id,
        } => {
            assert_eq!(agent_ids, ["a1", "a2"]);
            assert!(request_id.is_some_and(|id| id.starts_with("req-")));
        }
        other => panic!("expected keep-alive, got {other:?}"),
    }
}

// --- Stores ---

#[tokio::test]
async fn projects_store_follows_snapshot_and_deltas() {
    let (client, _server, mut peer) = connected_client().await;
    let store = ProjectsStore::new(client.clone());
    let mut rx = store.watch();

    let interest = store.subscribe();
    let second = store.subscribe();
    assert!(store.state().loading);
    assert!(matches!(
        recv(&mut peer).await,
        ClientMessage::Subscribe {
            channel: Channel::ProjectsList,
            ..
        }
    ));

    peer.send_raw(
        r#"{"type":"snapshot","channel":"projects-list","params":{},"data":{"projects":[{"id":"p1","name":"one"}]}}"#,
    );
    peer.send_raw(
        r#"{"type":"delta","channel":"projects-list","params":{},"data":{"op":"add","item":{"id":"p2","name":"two"}}}"#,
    );
    peer.send_raw(
        r#"{"type":"delta","channel":"projects-list","params":{},"data":{"op":"modify","itemId":"p1","changes":{"name":"uno"}}}"#,
    );
    let state = wait_until(&mut rx, "projects", |s| {
        s.projects.get("p1").is_some_and(|p| p.name == "uno") && s.projects.len() == 2
    })
    .await;
    assert!(!state.loading);
    assert!(state.subscribed);

    drop(interest);
    sync(&mut peer, 1).await;
    assert!(store.state().subscribed);
    drop(second);
    assert!(matches!(
        recv(&mut peer).await,
        ClientMessage::Unsubscribe { .. }
    ));
    let state = store.state();
    assert!(!state.subscribed);
    assert_eq!(state.projects.len(), 2);
}

#[tokio::test]
async fn agents_store_scopes() {
    let (client, _server, mut peer) = connected_client().await;
    let store = AgentsStore::new(client.clone());
    let mut rx = store.watch();

    let all = store.subscribe_all();
    recv(&mut peer).await;
    peer.send_raw(
        r#"{"type":"snapshot","channel":"agents-list","params":{},"data":{"agents":[{"id":"a1","state":"idle","projectId":"p1"},{"id":"a2","state":"running","projectId":"p2"}]}}"#,
    );
    wait_until(&mut rx, "all agents", |s| s.agents.len() == 2).await;

    let project = store.subscribe_to_project("p1");
    assert!(matches!(
        recv(&mut peer).await,
        ClientMessage::Subscribe { ref params, .. } if params.get("projectId") == Some(&json!("p1"))
    ));
    peer.send_raw(
        r#"{"type":"snapshot","channel":"agents-list","params":{"projectId":"p1"},"data":[{"id":"a3","state":"cloning","projectId":"p1"}]}"#,
    );
    let state = wait_until(&mut rx, "p1 agents", |s| s.agents.get("a3").is_some()).await;
    let mut ids: Vec<&str> = state.agents.items().iter().map(|a| a.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["a2", "a3"]);

    drop(project);
    recv(&mut peer).await;
    drop(all);
    recv(&mut peer).await;
    assert!(store.state().agents.is_empty());
}

#[tokio::test]
async fn event_store_pagination_and_optimistic_prompts() {
    let (client, _server, mut peer) = connected_client().await;
    let store = AgentEventsStore::new(client.clone(), EventsConfig::default());
    let mut rx = store.watch();

    // Nothing focused: nothing to expand.
    assert!(!store.load_older_events("a1"));

    store.set_focused_agent(Some("a1"));
    let first = recv(&mut peer).await;
    assert!(matches!(
        &first,
        ClientMessage::Subscribe { params, .. } if params.get("limit") == Some(&json!(80))
    ));

    peer.send_raw(
        r#"{"type":"snapshot","channel":"agent-events","params":{"agentId":"a1","limit":80},"data":{"events":[{"id":"e1","timestamp":10,"type":"response"}],"hasMore":false}}"#,
    );
    wait_until(&mut rx, "first snapshot", |s| s.events("a1").len() == 1).await;

    // hasMore is false: no new subscribe.
    assert!(!store.load_older_events("a1"));
    assert_eq!(store.limit(), Some(80));

    peer.send_raw(
        r#"{"type":"snapshot","channel":"agent-events","params":{"agentId":"a1","limit":80},"data":{"events":[{"id":"e1","timestamp":10,"type":"response"}],"hasMore":true}}"#,
    );
    wait_until(&mut rx, "hasMore", |s| s.has_more("a1")).await;

    assert!(store.load_older_events("a1"));
    assert!(!store.load_older_events("a1"), "one expansion at a time");
    assert!(matches!(recv(&mut peer).await, ClientMessage::Unsubscribe { .. }));
    assert!(matches!(
        recv(&mut peer).await,
        ClientMessage::Subscribe { params, .. } if params.get("limit") == Some(&json!(180))
    ));
    peer.send_raw(
        r#"{"type":"snapshot","channel":"agent-events","params":{"agentId":"a1","limit":180},"data":{"events":[{"id":"e0","timestamp":5,"type":"response"},{"id":"e1","timestamp":10,"type":"response"}],"hasMore":true}}"#,
    );
    let state = wait_until(&mut rx, "expanded window", |s| !s.is_loading_more("a1")).await;
    assert_eq!(state.events("a1").len(), 2);

    // Optimistic prompt: queued on success, then superseded by the server.
    let result: Result<u32, String> = store.submit_prompt("a1", "fix bug", async { Ok(7) }).await;
    assert_eq!(result, Ok(7));
    let pending = store.events("a1");
    let local = pending.iter().find(|e| e.id.starts_with("fp-")).unwrap();
    assert_eq!(local.prompt_status(), Some(PromptStatus::Queued));

    peer.send_raw(
        r#"{"type":"delta","channel":"agent-events","params":{"agentId":"a1","limit":180},"data":{"op":"add","item":{"id":"srv-1","timestamp":99999999999999,"type":"prompt","data":{"prompt":"fix bug"}}}}"#,
    );
    let state = wait_until(&mut rx, "supersession", |s| {
        s.events("a1").iter().any(|e| e.id == "srv-1")
    })
    .await;
    assert!(!state.events("a1").iter().any(|e| e.id.starts_with("fp-")));

    // Failed submit stays visible.
    let result: Result<(), &str> = store.submit_prompt("a1", "deploy", async { Err("offline") }).await;
    assert_eq!(result, Err("offline"));
    let failed = store
        .events("a1")
        .into_iter()
        .find(|e| e.prompt_text() == Some("deploy"))
        .unwrap();
    assert_eq!(failed.prompt_status(), Some(PromptStatus::Failed));
    assert!(store.remove_optimistic_prompt("a1", &failed.id));

    store.cleanup();
    assert!(matches!(recv(&mut peer).await, ClientMessage::Unsubscribe { .. }));
    assert!(store.focused_agent().is_none());
    assert!(store.events("a1").is_empty());
}

#[tokio::test]
async fn switching_focus_moves_the_subscription() {
    let (client, _server, mut peer) = connected_client().await;
    let store = AgentEventsStore::new(client.clone(), EventsConfig::default());

    store.set_focused_agent(Some("a1"));
    recv(&mut peer).await;
    store.set_focused_agent(Some("a1"));
    store.set_focused_agent(Some("a2"));
    assert_eq!(
        recv(&mut peer).await,
        ClientMessage::Unsubscribe {
            channel: Channel::AgentEvents,
            params: params(json!({ "agentId": "a1", "limit": 80 })),
        }
    );
    assert!(matches!(
        recv(&mut peer).await,
        ClientMessage::Subscribe { params, .. } if params.get("agentId") == Some(&json!("a2"))
    ));
    assert_eq!(store.focused_agent().as_deref(), Some("a2"));

    store.set_focused_agent(None);
    assert!(matches!(recv(&mut peer).await, ClientMessage::Unsubscribe { .. }));
}
