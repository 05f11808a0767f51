//! WebSocket Protocol Types
//!
//! JSON messages exchanged with the backend over the single multiplexed socket.
//! Every message carries a `type` tag; delta payloads carry an `op` tag.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Error code that ends the session for the current token.
pub const AUTHENTICATION_FAILED: &str = "AUTHENTICATION_FAILED";

/// Subscription parameters. Key order is irrelevant for identity, see [`subscription_key`].
pub type Params = serde_json::Map<String, Value>;

/// Server-side data feeds a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    AgentEvents,
    AgentSummaries,
    AgentsList,
    AgentAccesses,
    ProjectCollaborators,
    ProjectIssues,
    GithubTokenHealth,
    ProjectsList,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::AgentEvents => "agent-events",
            Channel::AgentSummaries => "agent-summaries",
            Channel::AgentsList => "agents-list",
            Channel::AgentAccesses => "agent-accesses",
            Channel::ProjectCollaborators => "project-collaborators",
            Channel::ProjectIssues => "project-issues",
            Channel::GithubTokenHealth => "github-token-health",
            Channel::ProjectsList => "projects-list",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical identity of a (channel, params) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the routing key for a subscription: `<channel>:<params JSON>` with
/// the parameter keys sorted lexicographically.
pub fn subscription_key(channel: Channel, params: &Params) -> SubscriptionKey {
    let sorted: BTreeMap<&str, &Value> = params.iter().map(|(k, v)| (k.as_str(), v)).collect();
    // Serializing a map of str -> Value cannot fail.
    let json = serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string());
    SubscriptionKey(format!("{}:{}", channel.as_str(), json))
}

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// First message on every freshly opened socket
    Authenticate { token: String },
    Subscribe {
        channel: Channel,
        params: Params,
        request_id: String,
    },
    Unsubscribe { channel: Channel, params: Params },
    /// Heartbeat reply, echoes the ping timestamp as received
    Pong { timestamp: Number },
    /// Best-effort liveness signal for a set of agents
    KeepAlive {
        agent_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Authentication accepted; the client replays its subscriptions
    Authenticated { user_id: String },
    /// Full current state for one subscription
    Snapshot {
        channel: Channel,
        #[serde(default)]
        params: Params,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default)]
        data: Value,
    },
    /// One incremental operation against the last snapshot
    Delta {
        channel: Channel,
        #[serde(default)]
        params: Params,
        data: DeltaUpdate,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: ErrorPayload,
    },
    Ping { timestamp: Number },
    KeepAliveResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default)]
        results: HashMap<String, KeepAliveResult>,
    },
}

impl ServerMessage {
    /// Routing key for data-bearing messages (snapshot and delta).
    pub fn subscription_key(&self) -> Option<SubscriptionKey> {
        match self {
            ServerMessage::Snapshot {
                channel, params, ..
            }
            | ServerMessage::Delta {
                channel, params, ..
            } => Some(subscription_key(*channel, params)),
            _ => None,
        }
    }

    /// Short name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Authenticated { .. } => "authenticated",
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::Delta { .. } => "delta",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Ping { .. } => "ping",
            ServerMessage::KeepAliveResponse { .. } => "keep-alive-response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorPayload {
    pub fn is_authentication_failure(&self) -> bool {
        self.code == AUTHENTICATION_FAILED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of a `delta` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaUpdate {
    #[serde(flatten)]
    pub op: DeltaOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Delta operation, one variant per `op` with only the fields it uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DeltaOp {
    Add {
        item: Value,
    },
    AddBatch {
        items: Vec<Value>,
    },
    /// Flat collections merge `changes`; the event log swaps in `item` whole.
    Modify {
        item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        changes: Option<serde_json::Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item: Option<Value>,
    },
    Delete {
        item_id: String,
    },
    Replace {
        item: Value,
    },
}

impl DeltaOp {
    pub fn name(&self) -> &'static str {
        match self {
            DeltaOp::Add { .. } => "add",
            DeltaOp::AddBatch { .. } => "add-batch",
            DeltaOp::Modify { .. } => "modify",
            DeltaOp::Delete { .. } => "delete",
            DeltaOp::Replace { .. } => "replace",
        }
    }
}
