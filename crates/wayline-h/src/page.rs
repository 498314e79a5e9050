use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::page::ScreenshotParams;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use wayline_engine::page::{ElementHandle, NavigationInfo, Page, PageError};

/// Script evaluation must not hang on a page blocked by a dialog.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts made while the execution context is being replaced by a navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

/// Retries `operation` only while the page context is unavailable.
async fn retry_on_context_error<T, E, F, Fut>(operation_name: &str, mut operation: F) -> Result<T, String>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;
    for attempt in 0..MAX_CONTEXT_RETRIES {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let err = e.to_string();
                if !is_context_error(&err) {
                    return Err(err);
                }
                tracing::debug!(
                    "{} context error (attempt {}/{}), retrying...",
                    operation_name,
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(err);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| format!("{} failed after retries", operation_name)))
}

/// [`Page`] backed by a Chromium tab.
#[derive(Debug, Clone)]
pub struct CdpPage {
    page: chromiumoxide::Page,
}

impl CdpPage {
    pub fn new(page: chromiumoxide::Page) -> Self {
        Self { page }
    }

    pub fn inner(&self) -> &chromiumoxide::Page {
        &self.page
    }

    async fn element(&self, handle: &ElementHandle) -> Result<chromiumoxide::Element, PageError> {
        self.page
            .find_element(handle.css())
            .await
            .map_err(|_| PageError::ElementNotFound(handle.css()))
    }

    async fn dispatch_key(&self, key: &str) -> Result<(), PageError> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let event = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .build()
                .map_err(|e| PageError::Internal(format!("Failed to build key event: {:?}", e)))?;
            self.page
                .execute(event)
                .await
                .map_err(|e| PageError::Internal(format!("press_key failed: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn navigate(&mut self, url: &str) -> Result<NavigationInfo, PageError> {
        tracing::info!("Navigating to: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| PageError::Navigation(e.to_string()))?;
        let url = self
            .page
            .url()
            .await
            .map_err(|e| PageError::Navigation(e.to_string()))?
            .unwrap_or_default();
        let title = self.page.get_title().await.ok().flatten().unwrap_or_default();
        Ok(NavigationInfo { url, title })
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, PageError> {
        let page = &self.page;
        let evaluated = tokio::time::timeout(
            EVAL_TIMEOUT,
            retry_on_context_error("evaluate", || page.evaluate(script)),
        )
        .await
        .map_err(|_| PageError::Timeout(format!("script did not return within {:?}", EVAL_TIMEOUT)))?
        .map_err(PageError::Script)?;
        Ok(evaluated.value().cloned().unwrap_or(Value::Null))
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), PageError> {
        let target = self.element(element).await?;
        target
            .scroll_into_view()
            .await
            .map_err(|e| PageError::Internal(format!("scroll failed: {}", e)))?;
        target
            .click()
            .await
            .map_err(|e| PageError::Internal(format!("click failed: {}", e)))?;
        Ok(())
    }

    async fn type_char(&mut self, element: &ElementHandle, ch: char) -> Result<(), PageError> {
        let target = self.element(element).await?;
        target
            .focus()
            .await
            .map_err(|e| PageError::Internal(format!("focus failed: {}", e)))?;
        target
            .type_str(ch.to_string())
            .await
            .map_err(|e| PageError::Internal(format!("typing failed: {}", e)))?;
        Ok(())
    }

    /// Keys go to the focused element when there is one, so that Enter
    /// submits forms; otherwise raw key events are sent to the page.
    async fn press_key(&mut self, key: &str) -> Result<(), PageError> {
        match self.page.find_element("*:focus").await {
            Ok(focused) => {
                focused
                    .press_key(key)
                    .await
                    .map_err(|e| PageError::Internal(format!("press_key failed: {}", e)))?;
                Ok(())
            }
            Err(_) => self.dispatch_key(key).await,
        }
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| PageError::Internal(format!("Screenshot failed: {}", e)))
    }

    async fn current_url(&mut self) -> Result<String, PageError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| PageError::Internal(e.to_string()))?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_errors_are_recognised() {
        assert!(is_context_error("Cannot find context with specified id"));
        assert!(is_context_error("Execution context was destroyed."));
        assert!(!is_context_error("ReferenceError: foo is not defined"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_on_other_errors() {
        let mut calls = 0;
        let result: Result<(), String> = retry_on_context_error("probe", || {
            calls += 1;
            async { Err::<(), _>("TypeError: x is null") }
        })
        .await;
        assert_eq!(result, Err("TypeError: x is null".to_string()));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_survives_navigation() {
        let mut calls = 0;
        let result = retry_on_context_error("probe", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err("Cannot find context with specified id")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }
}
