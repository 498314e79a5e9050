#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use wayline_common::{ChallengeProbe, ElementSnapshot, FieldCandidate, PageSummary, TableSnapshot};
use wayline_common::ExecutionPlan;
use wayline_engine::engine::{Engine, EngineError, EngineKind};
use wayline_engine::page::{ElementHandle, Locator, NavigationInfo, Page, PageError};
use wayline_engine::runner::{PlanRunner, RunContext, RunOutcome};

pub const PNG: [u8; 4] = [0x89, b'P', b'N', b'G'];

/// In-memory page: elements are looked up by exact locator.
#[derive(Debug, Default, Clone)]
pub struct MockPage {
    pub url: String,
    pub title: String,
    pub present: HashMap<Locator, ElementHandle>,
    pub snapshots: Vec<ElementSnapshot>,
    pub tables: Vec<TableSnapshot>,
    pub fields: Vec<FieldCandidate>,
    pub challenge: ChallengeProbe,
    /// Clicks that fail with a stale element before clicks start working.
    pub click_failures: usize,
    pub fail_navigation: bool,
    /// Time every `query` takes before answering.
    pub query_delay: Duration,
    pub typed: HashMap<String, String>,
    pub log: Vec<String>,
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            url: "about:blank".into(),
            ..Default::default()
        }
    }

    pub fn with_element(mut self, locator: Locator, reference: &str) -> Self {
        self.present.insert(locator, ElementHandle::new(reference));
        self
    }

    pub fn with_table(mut self, headers: &[&str], rows: &[&[&str]]) -> Self {
        self.tables.push(TableSnapshot {
            index: self.tables.len(),
            caption: None,
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        });
        self
    }

    pub fn navigations(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter_map(|l| l.strip_prefix("navigate:"))
            .collect()
    }
}

#[async_trait]
impl Page for MockPage {
    async fn navigate(&mut self, url: &str) -> Result<NavigationInfo, PageError> {
        self.log.push(format!("navigate:{}", url));
        if self.fail_navigation {
            return Err(PageError::Navigation("net::ERR_NAME_NOT_RESOLVED".into()));
        }
        self.url = url.to_string();
        Ok(NavigationInfo {
            url: self.url.clone(),
            title: self.title.clone(),
        })
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value, PageError> {
        Ok(Value::Null)
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), PageError> {
        self.log.push(format!("click:{}", element.reference));
        if self.click_failures > 0 {
            self.click_failures -= 1;
            return Err(PageError::ElementNotFound(element.css()));
        }
        Ok(())
    }

    async fn type_char(&mut self, element: &ElementHandle, ch: char) -> Result<(), PageError> {
        self.typed
            .entry(element.reference.clone())
            .or_default()
            .push(ch);
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> Result<(), PageError> {
        self.log.push(format!("key:{}", key));
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
        Ok(PNG.to_vec())
    }

    async fn query(&mut self, locator: &Locator) -> Result<Option<ElementHandle>, PageError> {
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }
        Ok(self.present.get(locator).cloned())
    }

    async fn clear(&mut self, element: &ElementHandle) -> Result<(), PageError> {
        self.typed.remove(&element.reference);
        Ok(())
    }

    async fn wait_for_idle(&mut self, _settle: Duration) -> Result<(), PageError> {
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, PageError> {
        Ok(self.url.clone())
    }

    async fn title(&mut self) -> Result<String, PageError> {
        Ok(self.title.clone())
    }

    async fn inspect(&mut self, _css: &str, limit: usize) -> Result<Vec<ElementSnapshot>, PageError> {
        Ok(self.snapshots.iter().take(limit).cloned().collect())
    }

    async fn scan_tables(&mut self) -> Result<Vec<TableSnapshot>, PageError> {
        Ok(self.tables.clone())
    }

    async fn analyze(&mut self) -> Result<PageSummary, PageError> {
        Ok(PageSummary {
            url: self.url.clone(),
            title: self.title.clone(),
            tables: self.tables.len(),
            inputs: self.fields.len(),
            ..Default::default()
        })
    }

    async fn detect_fields(&mut self) -> Result<Vec<FieldCandidate>, PageError> {
        Ok(self.fields.clone())
    }

    async fn probe_challenge(&mut self) -> Result<ChallengeProbe, PageError> {
        Ok(self.challenge.clone())
    }
}

/// In-process engine over a [`MockPage`].
#[derive(Debug, Default)]
pub struct PageEngine {
    pub page: MockPage,
    pub runner: PlanRunner,
    pub launched: bool,
}

impl PageEngine {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            runner: PlanRunner::default(),
            launched: false,
        }
    }
}

#[async_trait]
impl Engine for PageEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DirectDriver
    }

    async fn launch(&mut self) -> Result<(), EngineError> {
        self.launched = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.launched = false;
        Ok(())
    }

    async fn run(&mut self, plan: &ExecutionPlan, ctx: &RunContext) -> Result<RunOutcome, EngineError> {
        Ok(self.runner.run(plan, &mut self.page, ctx).await)
    }

    fn page(&mut self) -> Option<&mut dyn Page> {
        Some(&mut self.page)
    }
}
