use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// The closed set of step types the executor knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Navigate,
    Click,
    Type,
    Extract,
    Wait,
    Screenshot,
    AnalyzePage,
    KeyPress,
    SmartFill,
    CaptchaCheck,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Navigate => "navigate",
            StepKind::Click => "click",
            StepKind::Type => "type",
            StepKind::Extract => "extract",
            StepKind::Wait => "wait",
            StepKind::Screenshot => "screenshot",
            StepKind::AnalyzePage => "analyze_page",
            StepKind::KeyPress => "key_press",
            StepKind::SmartFill => "smart_fill",
            StepKind::CaptchaCheck => "captcha_check",
        }
    }

    /// Lenient parse used for classifier-suggested actions.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "navigate" | "goto" | "go_to" | "open" | "visit" => StepKind::Navigate,
            "click" | "tap" | "press_button" => StepKind::Click,
            "type" | "input" | "fill" | "enter_text" => StepKind::Type,
            "extract" | "scrape" | "read" => StepKind::Extract,
            "wait" | "wait_for" => StepKind::Wait,
            "screenshot" | "capture" => StepKind::Screenshot,
            "analyze_page" | "analyze" | "observe" => StepKind::AnalyzePage,
            "key_press" | "press" | "keypress" | "press_key" => StepKind::KeyPress,
            "smart_fill" | "fill_form" => StepKind::SmartFill,
            "captcha_check" | "captcha" => StepKind::CaptchaCheck,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alternative ways to find one element. At least one locator must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl ElementSelector {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            css: Some(selector.into()),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Page-wide target used by steps that do not address a single element.
    pub fn page() -> Self {
        Self::css("body")
    }

    pub fn with_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpath = Some(xpath.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn has_locator(&self) -> bool {
        [&self.css, &self.xpath, &self.text, &self.placeholder]
            .iter()
            .any(|l| l.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    /// Short human-readable form for logs and error messages.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(css) = &self.css {
            parts.push(format!("css={}", css));
        }
        if let Some(xpath) = &self.xpath {
            parts.push(format!("xpath={}", xpath));
        }
        if let Some(text) = &self.text {
            parts.push(format!("text=\"{}\"", text));
        }
        if let Some(placeholder) = &self.placeholder {
            parts.push(format!("placeholder=\"{}\"", placeholder));
        }
        if parts.is_empty() {
            "<empty selector>".to_string()
        } else {
            parts.join(" | ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepValidationError {
    #[error("step {0} has no locator")]
    MissingLocator(String),
    #[error("navigate step {0} has no destination URL")]
    MissingUrl(String),
    #[error("step {0} has a zero timeout")]
    ZeroTimeout(String),
}

/// One atomic browser action. Created by the planner, never mutated by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStep {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub target: ElementSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub description: String,
}

impl AutomationStep {
    pub fn new(kind: StepKind, target: ElementSelector, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            target,
            value: None,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            description: description.into(),
        }
    }

    pub fn navigate(url: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(StepKind::Navigate, ElementSelector::page(), description)
            .with_value(url)
            .with_timeout(30_000)
    }

    pub fn wait_for(target: ElementSelector, timeout_ms: u64, description: impl Into<String>) -> Self {
        Self::new(StepKind::Wait, target, description)
            .with_timeout(timeout_ms)
            .with_retries(1)
    }

    pub fn screenshot(description: impl Into<String>) -> Self {
        Self::new(StepKind::Screenshot, ElementSelector::page(), description).with_retries(1)
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Destination of a navigate step.
    pub fn url(&self) -> Option<&str> {
        match self.kind {
            StepKind::Navigate => self.value.as_deref().filter(|u| !u.trim().is_empty()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), StepValidationError> {
        if !self.target.has_locator() {
            return Err(StepValidationError::MissingLocator(self.id.clone()));
        }
        if self.kind == StepKind::Navigate && self.url().is_none() {
            return Err(StepValidationError::MissingUrl(self.id.clone()));
        }
        if self.timeout_ms == 0 {
            return Err(StepValidationError::ZeroTimeout(self.id.clone()));
        }
        Ok(())
    }
}
