use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One action proposed by the planner and carried over the adapter wire.
/// Wire shape: `{"action": "ui.click", "payload": {...}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", content = "payload")]
pub enum AgentAction {
    // Observe
    #[serde(rename = "ui.snapshot")]
    UiSnapshot { scope: Option<String> },

    // Act
    #[serde(rename = "ui.click")]
    UiClick { element_id: String },
    #[serde(rename = "mouse.move")]
    MouseMove { x: f64, y: f64 },
    #[serde(rename = "keyboard.type")]
    KeyboardType { text: String },

    // System
    #[serde(rename = "shell.exec")]
    ShellExec { command: String },
    #[serde(rename = "file.delete")]
    FileDelete { path: String },
    #[serde(rename = "system.terminate")]
    Terminate,
}

impl AgentAction {
    /// Dotted tool name used by allow/deny lists and audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::UiSnapshot { .. } => "ui.snapshot",
            AgentAction::UiClick { .. } => "ui.click",
            AgentAction::MouseMove { .. } => "mouse.move",
            AgentAction::KeyboardType { .. } => "keyboard.type",
            AgentAction::ShellExec { .. } => "shell.exec",
            AgentAction::FileDelete { .. } => "file.delete",
            AgentAction::Terminate => "system.terminate",
        }
    }

    /// Pure observation, no effect on UI state.
    pub fn is_observation(&self) -> bool {
        matches!(self, AgentAction::UiSnapshot { .. })
    }

    /// Whether a successful execution is expected to change the UI tree.
    /// The verify step treats a zero diff after one of these as a soft failure.
    pub fn mutates_ui(&self) -> bool {
        matches!(
            self,
            AgentAction::UiClick { .. } | AgentAction::KeyboardType { .. }
        )
    }
}

/// Request line on the adapter channel: `{"id": ..., "action": ..., "payload": ...}`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IpcRequest {
    pub id: String,
    #[serde(flatten)]
    pub action: AgentAction,
}

/// Response line, strictly one per request, in request order.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IpcResponse {
    pub request_id: String,
    pub status: String, // "success" | "failed" | "error"
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn success(request_id: &str, data: Value) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(request_id: &str, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: "failed".to_string(),
            data: None,
            error: Some(error.into()),
        }
    }

    /// Unparseable input: nothing to correlate against, so request_id is "unknown".
    pub fn protocol_error(error: impl Into<String>) -> Self {
        Self {
            request_id: "unknown".to_string(),
            status: "error".to_string(),
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Serializable view of one accessible UI element, fresh per snapshot.
/// `id` is a registry handle, valid only until the next snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UiNode {
    pub id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UiNode>,
}

/// Carried into subsequent planning calls so the model does not blindly
/// repeat an already-failed proposal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryContext {
    pub attempt: u32,
    pub last_action: Option<AgentAction>,
    pub error_summary: Option<String>,
}

impl RetryContext {
    pub fn record(&mut self, action: Option<AgentAction>, error: impl Into<String>) {
        self.attempt += 1;
        self.last_action = action;
        self.error_summary = Some(error.into());
    }

    /// Prompt line injected into the planning history when retrying.
    pub fn as_prompt_line(&self) -> String {
        format!(
            "RETRY_CONTEXT: attempt={} last_action={} last_error={}",
            self.attempt,
            self.last_action
                .as_ref()
                .map(|a| a.kind())
                .unwrap_or("none"),
            self.error_summary.as_deref().unwrap_or("none"),
        )
    }
}
