//! Domain entities carried by the data channels.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Lifecycle of a hosted agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Provisioning,
    Provisioned,
    Cloning,
    Ready,
    Idle,
    Running,
    Error,
    Archiving,
    Archived,
    #[serde(other)]
    Unknown,
}

impl AgentState {
    pub fn label(&self) -> &'static str {
        match self {
            AgentState::Provisioning => "Provisioning",
            AgentState::Provisioned => "Provisioned",
            AgentState::Cloning => "Cloning",
            AgentState::Ready => "Ready",
            AgentState::Idle => "Idle",
            AgentState::Running => "Running",
            AgentState::Error => "Error",
            AgentState::Archiving => "Archiving",
            AgentState::Archived => "Archived",
            AgentState::Unknown => "Unknown",
        }
    }

    /// Usable right now.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AgentState::Running | AgentState::Idle | AgentState::Ready
        )
    }

    /// In a transitional state the user has to wait out.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AgentState::Provisioning
                | AgentState::Provisioned
                | AgentState::Cloning
                | AgentState::Archiving
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub state: AgentState,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub machine_public_ip: Option<String>,
    #[serde(default)]
    pub machine_public_hostname: Option<String>,
    #[serde(default)]
    pub streaming_port: Option<u16>,
    #[serde(default)]
    pub terminal_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Prompt,
    Response,
    GitCheckpoint,
    Reset,
    Automation,
    ContextWarning,
    CompactionStart,
    CompactionComplete,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    Sending,
    Queued,
    Running,
    Finished,
    Failed,
}

/// One entry in an agent's conversation log. `data` is kind-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub id: String,
    /// Unix millis; the log is ordered by this. Any JSON number is accepted.
    pub timestamp: f64,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
}

impl ChatEvent {
    /// Client-side prompt shown before the server confirms it.
    pub fn optimistic_prompt(text: impl Into<String>) -> Self {
        Self {
            id: format!("fp-{}", uuid::Uuid::new_v4()),
            timestamp: chrono::Utc::now().timestamp_millis() as f64,
            task_id: None,
            kind: EventKind::Prompt,
            data: json!({
                "prompt": text.into(),
                "status": PromptStatus::Sending,
                "is_reverted": false,
            }),
        }
    }

    pub fn prompt_text(&self) -> Option<&str> {
        if self.kind != EventKind::Prompt {
            return None;
        }
        self.data.get("prompt").and_then(Value::as_str)
    }

    pub fn prompt_status(&self) -> Option<PromptStatus> {
        if self.kind != EventKind::Prompt {
            return None;
        }
        self.data
            .get("status")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Returns false when this is not a prompt event.
    pub fn set_prompt_status(&mut self, status: PromptStatus) -> bool {
        if self.kind != EventKind::Prompt {
            return false;
        }
        match &mut self.data {
            Value::Object(map) => {
                map.insert("status".into(), json!(status));
            }
            other => *other = json!({ "status": status }),
        }
        true
    }

    /// Same logical prompt as `other`, compared by text rather than id.
    pub fn is_same_prompt(&self, other: &ChatEvent) -> bool {
        match (self.prompt_text(), other.prompt_text()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
