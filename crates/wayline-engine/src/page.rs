use crate::scripts;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use wayline_common::{ChallengeProbe, ElementSnapshot, FieldCandidate, PageSummary, TableSnapshot};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Unexpected script result: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Page is closed")]
    Closed,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PageError {
    /// Errors after which no further interaction with the page can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PageError::Closed)
    }
}

/// One way of finding an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
    /// Visible text contained in the element.
    Text(String),
    /// Substring of aria-label, title, alt or placeholder.
    Attribute(String),
}

impl Locator {
    pub fn name(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css",
            Locator::XPath(_) => "xpath",
            Locator::Text(_) => "text",
            Locator::Attribute(_) => "attribute",
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) | Locator::XPath(s) => write!(f, "{}={}", self.name(), s),
            Locator::Text(s) | Locator::Attribute(s) => write!(f, "{}=\"{}\"", self.name(), s),
        }
    }
}

/// A live element, addressed by the reference attribute stamped on it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ElementHandle {
    pub reference: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub text: String,
}

impl ElementHandle {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            tag: String::new(),
            text: String::new(),
        }
    }

    /// CSS selector that matches exactly this element.
    pub fn css(&self) -> String {
        format!("[{}=\"{}\"]", scripts::REF_ATTRIBUTE, self.reference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationInfo {
    pub url: String,
    pub title: String,
}

/// Handle to a single browser page. Engines own their page exclusively.
///
/// Only the primitive operations are required; the typed observation helpers
/// default to scripts run through [`Page::evaluate`].
#[async_trait]
pub trait Page: Send {
    /// Load a URL and return once the navigation has committed.
    async fn navigate(&mut self, url: &str) -> Result<NavigationInfo, PageError>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> Result<Value, PageError>;

    async fn click(&mut self, element: &ElementHandle) -> Result<(), PageError>;

    /// Type a single character into the focused element.
    async fn type_char(&mut self, element: &ElementHandle, ch: char) -> Result<(), PageError>;

    async fn press_key(&mut self, key: &str) -> Result<(), PageError>;

    /// Full-page PNG capture.
    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError>;

    async fn query(&mut self, locator: &Locator) -> Result<Option<ElementHandle>, PageError> {
        let value = self.evaluate(&scripts::locate(locator)).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Select the element's contents and delete them.
    async fn clear(&mut self, element: &ElementHandle) -> Result<(), PageError> {
        let selected = self
            .evaluate(&scripts::select_contents(&element.css()))
            .await?;
        if selected != Value::Bool(true) {
            return Err(PageError::ElementNotFound(element.css()));
        }
        self.press_key("Backspace").await
    }

    /// Wait for `document.readyState == "complete"`, then let the page settle.
    async fn wait_for_idle(&mut self, settle: Duration) -> Result<(), PageError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let state = self.evaluate(scripts::READY_STATE).await?;
            if state.as_str() == Some("complete") {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!("document not complete after 10s (state: {})", state);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(settle).await;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, PageError> {
        eval_as(self, scripts::LOCATION).await
    }

    async fn title(&mut self) -> Result<String, PageError> {
        eval_as(self, scripts::TITLE).await
    }

    async fn inspect(&mut self, css: &str, limit: usize) -> Result<Vec<ElementSnapshot>, PageError> {
        eval_as(self, &scripts::inspect(css, limit)).await
    }

    async fn scan_tables(&mut self) -> Result<Vec<TableSnapshot>, PageError> {
        eval_as(self, scripts::SCAN_TABLES).await
    }

    async fn analyze(&mut self) -> Result<PageSummary, PageError> {
        eval_as(self, scripts::ANALYZE).await
    }

    async fn detect_fields(&mut self) -> Result<Vec<FieldCandidate>, PageError> {
        eval_as(self, scripts::DETECT_FIELDS).await
    }

    async fn probe_challenge(&mut self) -> Result<ChallengeProbe, PageError> {
        eval_as(self, scripts::PROBE_CHALLENGE).await
    }
}

async fn eval_as<P, T>(page: &mut P, script: &str) -> Result<T, PageError>
where
    P: Page + ?Sized,
    T: DeserializeOwned,
{
    let value = page.evaluate(script).await?;
    Ok(serde_json::from_value(value)?)
}
