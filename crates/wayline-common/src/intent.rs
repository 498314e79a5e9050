use crate::step::ElementSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// High-level purpose of a user command, as decided by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Search,
    FormFill,
    DataExtract,
    Research,
    Navigate,
    Monitor,
    /// Anything the classifier produced that this crate does not know.
    #[serde(other)]
    Unknown,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Search => "search",
            IntentKind::FormFill => "form_fill",
            IntentKind::DataExtract => "data_extract",
            IntentKind::Research => "research",
            IntentKind::Navigate => "navigate",
            IntentKind::Monitor => "monitor",
            IntentKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationIntent {
    #[serde(rename = "type")]
    pub kind: IntentKind,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub description: String,
}

impl AutomationIntent {
    pub fn new(kind: IntentKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            complexity: Complexity::Simple,
            description: description.into(),
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }
}

/// Free-form parameters extracted alongside the intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParameters {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub extraction_targets: Vec<String>,
    #[serde(default)]
    pub form_data: BTreeMap<String, String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Target of a suggested action: either a bare CSS selector or a full locator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTarget {
    Css(String),
    Selector(ElementSelector),
}

/// A concrete step suggested by the classifier, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RawTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// What the intent classifier returns for a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub intent: AutomationIntent,
    #[serde(default)]
    pub parameters: CommandParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<Vec<RawAction>>,
    #[serde(default)]
    pub confidence: f32,
}
