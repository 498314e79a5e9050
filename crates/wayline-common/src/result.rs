use crate::intent::AutomationIntent;
use crate::observation::{ChallengeProbe, PageSummary};
use crate::plan::{ExecutionPlan, FallbackCondition};
use crate::step::StepKind;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    Text,
    Table,
    Form,
    Image,
    Link,
    Structured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub url: String,
    pub selector: String,
    pub timestamp: DateTime<Utc>,
}

impl DataSource {
    pub fn now(url: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selector: selector.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ExtractionKind,
    pub content: Value,
    pub source: DataSource,
    pub confidence: f32,
}

impl ExtractedData {
    pub fn new(kind: ExtractionKind, content: Value, source: DataSource, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content,
            source,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Why a step attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum StepError {
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },
    #[error("step timed out after {ms}ms")]
    Timeout { ms: u64 },
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },
    #[error("unsupported step type: {kind}")]
    UnsupportedStepType { kind: String },
    #[error("blocked by bot protection: {reason}")]
    Blocked { reason: String },
    #[error("page unavailable: {reason}")]
    PageUnavailable { reason: String },
}

impl StepError {
    /// Plan-level fallback that applies to this failure, if any.
    pub fn fallback_condition(&self) -> Option<FallbackCondition> {
        match self {
            StepError::ElementNotFound { .. } => Some(FallbackCondition::ElementNotFound),
            StepError::Timeout { .. } => Some(FallbackCondition::Timeout),
            _ => None,
        }
    }
}

/// Typed payload of a successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum StepOutput {
    Navigated { url: String, title: String },
    Clicked { via: String },
    Typed { chars: usize },
    Waited { found: bool },
    Extracted { items: Vec<ExtractedData> },
    Captured { bytes: usize },
    Analyzed { summary: PageSummary },
    KeyPressed { key: String },
    Filled { fields: BTreeMap<String, bool> },
    ChallengeChecked { probe: ChallengeProbe },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub kind: StepKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StepOutput>,
    /// Raw PNG bytes; exported separately as a base64 [`Screenshot`].
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn extracted(&self) -> &[ExtractedData] {
        match &self.data {
            Some(StepOutput::Extracted { items }) => items,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub step_id: String,
    /// Base64-encoded PNG.
    pub data: String,
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    pub fn from_png(step_id: impl Into<String>, png: &[u8]) -> Self {
        Self {
            step_id: step_id.into(),
            data: STANDARD.encode(png),
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Attempting,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTag {
    BotDetection,
    Timeout,
    Other,
}

/// Outcome of one destination in a multi-target run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub bot_hostile: bool,
    pub state: TargetState,
    pub history: Vec<TargetState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureTag>,
    pub extracted: usize,
    pub duration_ms: u64,
}

impl TargetReport {
    pub fn pending(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            rank: None,
            bot_hostile: false,
            state: TargetState::Pending,
            history: vec![TargetState::Pending],
            error: None,
            failure: None,
            extracted: 0,
            duration_ms: 0,
        }
    }

    pub fn transition(&mut self, state: TargetState) {
        self.state = state;
        self.history.push(state);
    }

    pub fn was_attempted(&self) -> bool {
        self.history.contains(&TargetState::Attempting)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub engine: String,
    pub steps_total: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub stopped: bool,
    pub multi_target: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_results: Vec<StepResult>,
}

/// Terminal record of one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResult {
    pub id: String,
    pub command: String,
    pub intent: AutomationIntent,
    pub execution_plan: ExecutionPlan,
    pub extracted_data: Vec<ExtractedData>,
    pub screenshots: Vec<Screenshot>,
    pub duration_ms: u64,
    pub success: bool,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: RunMetadata,
}

impl AutomationResult {
    pub fn summary(&self) -> String {
        format!(
            "{} in {}ms: {} data item(s), {} screenshot(s), {} error(s)",
            if self.success { "succeeded" } else { "failed" },
            self.duration_ms,
            self.extracted_data.len(),
            self.screenshots.len(),
            self.errors.len()
        )
    }
}
