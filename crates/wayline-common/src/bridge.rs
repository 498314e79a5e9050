//! Wire protocol spoken with the agent bridge process.
//!
//! Every message is one JSON object on its own line. The bridge announces
//! itself with a `ready` message before accepting requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound the bridge applies to a task timeout, in seconds.
pub const MAX_TASK_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    ExecuteTask,
    Test,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Seconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TaskPayload>,
    pub id: String,
}

impl BridgeRequest {
    pub fn execute_task(
        id: impl Into<String>,
        task: impl Into<String>,
        url: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            kind: RequestKind::ExecuteTask,
            data: Some(TaskPayload {
                task: task.into(),
                url,
                timeout: timeout_secs.clamp(1, MAX_TASK_TIMEOUT_SECS),
            }),
            id: id.into(),
        }
    }

    pub fn test(id: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Test,
            data: None,
            id: id.into(),
        }
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Ping,
            data: None,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Ready,
    Success,
    Error,
    TestSuccess,
    TestError,
    Pong,
    #[serde(other)]
    Unknown,
}

impl ResponseKind {
    pub fn is_failure(&self) -> bool {
        matches!(self, ResponseKind::Error | ResponseKind::TestError)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl BridgeResponse {
    /// Decodes the `data` field of a `success` response.
    pub fn task_report(&self) -> Option<TaskReport> {
        self.data
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalState {
    pub url: Option<String>,
}

/// Outcome of an `execute_task` request as reported by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskReport {
    pub success: bool,
    pub actions_taken: Vec<String>,
    pub final_state: FinalState,
    /// Base64 PNGs.
    pub screenshots: Vec<String>,
    pub extracted_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
