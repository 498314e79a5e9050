use crate::page::{ElementHandle, Locator, Page, PageError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use wayline_common::ElementSelector;

/// Upper bound on how long a single locator alternative is polled.
pub const MAX_ALTERNATIVE_WAIT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    pub handle: ElementHandle,
    /// The alternative that matched.
    pub via: Locator,
}

impl ResolvedElement {
    /// How much an extraction through this element can be trusted.
    pub fn confidence(&self) -> f32 {
        match self.via {
            Locator::Css(_) => 0.9,
            Locator::XPath(_) => 0.8,
            Locator::Text(_) => 0.6,
            Locator::Attribute(_) => 0.5,
        }
    }
}

/// Tries the alternatives of an [`ElementSelector`] in a fixed order until one
/// yields a live element.
#[derive(Debug, Clone)]
pub struct ElementResolver {
    poll_interval: Duration,
}

impl Default for ElementResolver {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl ElementResolver {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// CSS, then XPath, then visible text, then attribute heuristics.
    pub fn candidates(selector: &ElementSelector) -> Vec<Locator> {
        let non_blank = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let mut out = Vec::new();
        if let Some(css) = non_blank(&selector.css) {
            out.push(Locator::Css(css));
        }
        if let Some(xpath) = non_blank(&selector.xpath) {
            out.push(Locator::XPath(xpath));
        }
        if let Some(text) = non_blank(&selector.text) {
            out.push(Locator::Text(text.clone()));
            out.push(Locator::Attribute(text));
        }
        if let Some(placeholder) = non_blank(&selector.placeholder) {
            let attr = Locator::Attribute(placeholder);
            if !out.contains(&attr) {
                out.push(attr);
            }
        }
        out
    }

    /// Every alternative gets at most `min(timeout, 5s)`, and the whole chain
    /// shares a single `timeout` deadline. Each alternative is queried at
    /// least once, even after the deadline has passed.
    pub async fn resolve(
        &self,
        selector: &ElementSelector,
        page: &mut dyn Page,
        timeout: Duration,
    ) -> Result<Option<ResolvedElement>, PageError> {
        let deadline = Instant::now() + timeout;
        let per_alternative = timeout.min(MAX_ALTERNATIVE_WAIT);
        for locator in Self::candidates(selector) {
            let wait = per_alternative.min(deadline.saturating_duration_since(Instant::now()));
            if let Some(handle) = self.poll(&locator, page, wait).await? {
                debug!("Resolved {} via {}", selector.describe(), locator);
                return Ok(Some(ResolvedElement {
                    handle,
                    via: locator,
                }));
            }
            debug!("No match for {} within {:?}", locator, wait);
        }
        Ok(None)
    }

    async fn poll(
        &self,
        locator: &Locator,
        page: &mut dyn Page,
        wait: Duration,
    ) -> Result<Option<ElementHandle>, PageError> {
        let deadline = Instant::now() + wait;
        loop {
            match page.query(locator).await {
                Ok(Some(handle)) => return Ok(Some(handle)),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("Query {} failed: {}", locator, e),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
