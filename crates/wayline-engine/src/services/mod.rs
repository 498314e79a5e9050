//! External collaborators: intent classification, site selection, next-step
//! advice and result persistence.

pub mod http;
pub mod rules;
pub mod sink;

use crate::planner::route::RouteIntent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wayline_common::{AutomationResult, AutomationStep, Classification, PageSummary, StepResult};

pub use http::{HttpAdvisor, HttpClassifier, HttpSiteSelector};
pub use rules::RuleClassifier;
pub use sink::JsonDirSink;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed service response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, command: &str) -> Result<Classification, ServiceError>;
}

/// One entry of a site selector's shortlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteChoice {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub reason: String,
}

/// Ranks destination sites for a route. Returns raw JSON text of the form
/// `[{"name", "url", "reason"}]`, possibly wrapped in a markdown fence.
#[async_trait]
pub trait SiteSelector: Send + Sync {
    async fn select_sites(
        &self,
        search_text: &str,
        route: &RouteIntent,
    ) -> Result<String, ServiceError>;
}

/// Parses a site selector reply, tolerating markdown code fences.
pub fn parse_site_choices(raw: &str) -> Result<Vec<SiteChoice>, ServiceError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| ServiceError::Decode(e.to_string()))
}

/// What the advisor wants the autonomous engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Advice {
    Act(AutomationStep),
    Done(String),
}

#[async_trait]
pub trait ActionAdvisor: Send + Sync {
    async fn next_step(
        &self,
        goal: &str,
        observation: &PageSummary,
        history: &[StepResult],
    ) -> Result<Advice, ServiceError>;

    /// Cheap reachability check used by availability probes.
    async fn ping(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, result: &AutomationResult) -> Result<(), ServiceError>;
}
