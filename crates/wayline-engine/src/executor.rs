//! Executes a single [`AutomationStep`] against a [`Page`].
//!
//! Every step runs inside a recovery envelope: up to `retry_count` attempts
//! (at least one), each bounded by the step timeout plus a grace period, with
//! a fixed delay between attempts. `execute` never returns an error; failures
//! are reported through [`StepResult::error`].

use crate::fields;
use crate::page::{Locator, Page, PageError};
use crate::resolver::{ElementResolver, ResolvedElement};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wayline_common::{
    AutomationStep, DataSource, ExtractedData, ExtractionKind, StepError, StepKind, StepOutput,
    StepResult,
};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry_delay: Duration,
    pub keystroke_delay: Duration,
    /// Extra time granted to an attempt on top of the step timeout.
    pub attempt_grace: Duration,
    /// Pause after a navigation reaches `complete`.
    pub settle_delay: Duration,
    /// Maximum number of elements inspected by an extract step.
    pub inspect_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(1000),
            keystroke_delay: Duration::from_millis(50),
            attempt_grace: Duration::from_millis(5000),
            settle_delay: Duration::from_millis(1000),
            inspect_limit: 50,
        }
    }
}

struct Attempt {
    output: StepOutput,
    screenshot: Option<Vec<u8>>,
}

impl From<StepOutput> for Attempt {
    fn from(output: StepOutput) -> Self {
        Self {
            output,
            screenshot: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    config: ExecutorConfig,
    resolver: ElementResolver,
}

impl StepExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            resolver: ElementResolver::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: ElementResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub async fn execute(&self, step: &AutomationStep, page: &mut dyn Page) -> StepResult {
        let started = Instant::now();
        let max_attempts = step.retry_count.max(1);
        let budget = Duration::from_millis(step.timeout_ms) + self.config.attempt_grace;
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            debug!(
                "Step {} ({}) attempt {}/{}",
                step.id, step.kind, attempts, max_attempts
            );
            let outcome = match tokio::time::timeout(budget, self.attempt(step, page)).await {
                Ok(outcome) => outcome,
                Err(_) if step.kind == StepKind::Wait => {
                    debug!("Wait on {} ran out of time", step.target.describe());
                    Ok(StepOutput::Waited { found: false }.into())
                }
                Err(_) => Err(StepError::Timeout {
                    ms: budget.as_millis() as u64,
                }),
            };
            match outcome {
                Ok(attempt) => {
                    info!("Step '{}' succeeded after {} attempt(s)", step.description, attempts);
                    return StepResult {
                        step_id: step.id.clone(),
                        kind: step.kind,
                        success: true,
                        data: Some(attempt.output),
                        screenshot: attempt.screenshot,
                        error: None,
                        attempts,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Err(e) => {
                    warn!(
                        "Step '{}' attempt {} failed: {}",
                        step.description, attempts, e
                    );
                    let retryable = is_retryable(&e);
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    if attempts < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        StepResult {
            step_id: step.id.clone(),
            kind: step.kind,
            success: false,
            data: None,
            screenshot: None,
            error: last_error,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn attempt(
        &self,
        step: &AutomationStep,
        page: &mut dyn Page,
    ) -> Result<Attempt, StepError> {
        match step.kind {
            StepKind::Navigate => self.navigate(step, page).await.map(Attempt::from),
            StepKind::Click => {
                let element = self.require(step, page).await?;
                page.click(&element.handle)
                    .await
                    .map_err(|e| page_failure(e, step))?;
                Ok(StepOutput::Clicked {
                    via: element.via.name().to_string(),
                }
                .into())
            }
            StepKind::Type => {
                let element = self.require(step, page).await?;
                let text = step.value.clone().unwrap_or_default();
                self.type_into(page, &element, &text)
                    .await
                    .map_err(|e| page_failure(e, step))?;
                Ok(StepOutput::Typed {
                    chars: text.chars().count(),
                }
                .into())
            }
            StepKind::Extract => self.extract(step, page).await.map(Attempt::from),
            StepKind::Wait => {
                let timeout = Duration::from_millis(step.timeout_ms);
                let found = match self.resolver.resolve(&step.target, page, timeout).await {
                    Ok(found) => found.is_some(),
                    Err(e) => {
                        debug!("Wait on {} ended early: {}", step.target.describe(), e);
                        false
                    }
                };
                Ok(StepOutput::Waited { found }.into())
            }
            StepKind::Screenshot => {
                let png = page.screenshot().await.map_err(|e| page_failure(e, step))?;
                Ok(Attempt {
                    output: StepOutput::Captured { bytes: png.len() },
                    screenshot: Some(png),
                })
            }
            StepKind::AnalyzePage => {
                let summary = page.analyze().await.map_err(|e| page_failure(e, step))?;
                Ok(StepOutput::Analyzed { summary }.into())
            }
            StepKind::KeyPress => {
                let key = step
                    .value
                    .as_deref()
                    .filter(|k| !k.trim().is_empty())
                    .unwrap_or("Enter")
                    .to_string();
                page.press_key(&key)
                    .await
                    .map_err(|e| page_failure(e, step))?;
                Ok(StepOutput::KeyPressed { key }.into())
            }
            StepKind::SmartFill => self.smart_fill(step, page).await.map(Attempt::from),
            StepKind::CaptchaCheck => {
                let probe = page
                    .probe_challenge()
                    .await
                    .map_err(|e| page_failure(e, step))?;
                if probe.detected {
                    return Err(StepError::Blocked {
                        reason: probe.signals.join(", "),
                    });
                }
                Ok(StepOutput::ChallengeChecked { probe }.into())
            }
        }
    }

    async fn navigate(
        &self,
        step: &AutomationStep,
        page: &mut dyn Page,
    ) -> Result<StepOutput, StepError> {
        let url = step.url().ok_or_else(|| StepError::NavigationFailed {
            url: String::new(),
            reason: "navigate step has no URL".into(),
        })?;
        let info = page
            .navigate(url)
            .await
            .map_err(|e| StepError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = page.wait_for_idle(self.config.settle_delay).await {
            if e.is_fatal() {
                return Err(page_failure(e, step));
            }
            warn!("Page at {} did not settle: {}", url, e);
        }
        let url = page.current_url().await.unwrap_or(info.url);
        let title = page.title().await.unwrap_or(info.title);
        Ok(StepOutput::Navigated { url, title })
    }

    async fn require(
        &self,
        step: &AutomationStep,
        page: &mut dyn Page,
    ) -> Result<ResolvedElement, StepError> {
        let timeout = Duration::from_millis(step.timeout_ms);
        self.resolver
            .resolve(&step.target, page, timeout)
            .await
            .map_err(|e| page_failure(e, step))?
            .ok_or_else(|| StepError::ElementNotFound {
                selector: step.target.describe(),
            })
    }

    async fn type_into(
        &self,
        page: &mut dyn Page,
        element: &ResolvedElement,
        text: &str,
    ) -> Result<(), PageError> {
        page.click(&element.handle).await?;
        page.clear(&element.handle).await?;
        for ch in text.chars() {
            page.type_char(&element.handle, ch).await?;
            tokio::time::sleep(self.config.keystroke_delay).await;
        }
        Ok(())
    }

    async fn extract(
        &self,
        step: &AutomationStep,
        page: &mut dyn Page,
    ) -> Result<StepOutput, StepError> {
        let url = page.current_url().await.unwrap_or_default();
        let mut items = Vec::new();

        let timeout = Duration::from_millis(step.timeout_ms);
        match self.resolver.resolve(&step.target, page, timeout).await {
            Ok(Some(element)) => {
                let selector = match &element.via {
                    Locator::Css(css) => css.clone(),
                    _ => element.handle.css(),
                };
                match page.inspect(&selector, self.config.inspect_limit).await {
                    Ok(snapshots) if !snapshots.is_empty() => items.push(ExtractedData::new(
                        ExtractionKind::Structured,
                        json!({ "selector": selector, "elements": snapshots }),
                        DataSource::now(&url, &selector),
                        element.confidence(),
                    )),
                    Ok(_) => debug!("Nothing to inspect at {}", selector),
                    Err(e) if e.is_fatal() => return Err(page_failure(e, step)),
                    Err(e) => warn!("Inspecting {} failed: {}", selector, e),
                }
            }
            Ok(None) => debug!("Extract target {} not found", step.target.describe()),
            Err(e) => return Err(page_failure(e, step)),
        }

        match page.scan_tables().await {
            Ok(tables) => {
                for table in tables.into_iter().filter(|t| !t.is_empty()) {
                    let selector = format!("table:nth-of-type({})", table.index + 1);
                    let content = serde_json::to_value(&table).unwrap_or_default();
                    items.push(ExtractedData::new(
                        ExtractionKind::Table,
                        content,
                        DataSource::now(&url, selector),
                        0.9,
                    ));
                }
            }
            Err(e) if e.is_fatal() => return Err(page_failure(e, step)),
            Err(e) => warn!("Table scan failed: {}", e),
        }

        if items.is_empty() {
            return Err(StepError::ElementNotFound {
                selector: step.target.describe(),
            });
        }
        Ok(StepOutput::Extracted { items })
    }

    async fn smart_fill(
        &self,
        step: &AutomationStep,
        page: &mut dyn Page,
    ) -> Result<StepOutput, StepError> {
        let values: BTreeMap<String, String> = match step.value.as_deref() {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("smart_fill value is not a JSON object: {}", e);
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        let candidates = page
            .detect_fields()
            .await
            .map_err(|e| page_failure(e, step))?;
        let ranked = fields::rank(&candidates);
        debug!("Detected {} fillable field(s)", ranked.len());

        let mut filled = BTreeMap::new();
        for (key, value, field) in fields::assign(&values, &ranked) {
            let Some(field) = field else {
                warn!("No field found for '{}'", key);
                filled.insert(key, false);
                continue;
            };
            let locator = Locator::Css(field.candidate.selector.clone());
            let ok = match page.query(&locator).await {
                Ok(Some(handle)) => {
                    let element = ResolvedElement {
                        handle,
                        via: locator,
                    };
                    match self.type_into(page, &element, &value).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Filling '{}' failed: {}", key, e);
                            false
                        }
                    }
                }
                Ok(None) => false,
                Err(e) if e.is_fatal() => return Err(page_failure(e, step)),
                Err(e) => {
                    warn!("Field for '{}' vanished: {}", key, e);
                    false
                }
            };
            info!(
                "smart_fill {} -> {} ({})",
                key,
                field.candidate.selector,
                if ok { "filled" } else { "failed" }
            );
            filled.insert(key, ok);
        }

        if !filled.values().any(|ok| *ok) {
            return Err(StepError::ElementNotFound {
                selector: "fillable form fields".into(),
            });
        }
        Ok(StepOutput::Filled { fields: filled })
    }
}

/// Challenges and unknown step types do not go away on retry.
fn is_retryable(err: &StepError) -> bool {
    !matches!(
        err,
        StepError::Blocked { .. } | StepError::UnsupportedStepType { .. }
    )
}

fn page_failure(err: PageError, step: &AutomationStep) -> StepError {
    match err {
        PageError::ElementNotFound(selector) => StepError::ElementNotFound { selector },
        PageError::Timeout(_) => StepError::Timeout {
            ms: step.timeout_ms,
        },
        PageError::Navigation(reason) => StepError::NavigationFailed {
            url: step.value.clone().unwrap_or_default(),
            reason,
        },
        PageError::NotSupported(op) => StepError::UnsupportedStepType {
            kind: format!("{} ({} not supported by this page)", step.kind, op),
        },
        other => StepError::PageUnavailable {
            reason: other.to_string(),
        },
    }
}
