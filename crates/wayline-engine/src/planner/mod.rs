//! Turns a classified command into an [`ExecutionPlan`].

pub mod generators;
pub mod route;
pub mod sites;

use crate::services::{SiteChoice, SiteSelector, parse_site_choices};
use route::{RouteIntent, classify_route, synthesize_url};
use sites::{SiteRegistry, SiteVisit};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use wayline_common::{
    AutomationIntent, AutomationStep, CommandParameters, ElementSelector, ExecutionPlan,
    FallbackCondition, FallbackStrategy, IntentKind, PlanValidationError, RawAction, RawTarget,
    ResourceKind, ResourceRequirement, StepKind,
};

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Unsupported intent '{0}' and no suggested actions")]
    UnsupportedIntent(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanValidationError),
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Fewest usable site-selector entries accepted before falling back to defaults.
    pub min_sites: usize,
    pub max_sites: usize,
    pub max_browsers: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_sites: 3,
            max_sites: 4,
            max_browsers: 3,
        }
    }
}

pub struct ExecutionPlanner {
    config: PlannerConfig,
    sites: SiteRegistry,
    selector: Option<Arc<dyn SiteSelector>>,
}

impl Default for ExecutionPlanner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

impl ExecutionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            sites: SiteRegistry::builtin(),
            selector: None,
        }
    }

    pub fn with_sites(mut self, sites: SiteRegistry) -> Self {
        self.sites = sites;
        self
    }

    pub fn with_site_selector(mut self, selector: Arc<dyn SiteSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn sites(&self) -> &SiteRegistry {
        &self.sites
    }

    pub async fn create_plan(
        &self,
        goal: &str,
        intent: &AutomationIntent,
        params: &CommandParameters,
        suggested: Option<&[RawAction]>,
    ) -> Result<ExecutionPlan, PlannerError> {
        let mut steps = None;

        if let Some(actions) = suggested.filter(|a| !a.is_empty()) {
            let normalized = self.normalize_actions(actions, goal);
            if normalized.is_empty() {
                warn!("None of the {} suggested actions were usable", actions.len());
            } else if let Some(route) = first_navigate_route(&normalized) {
                info!("Suggested actions look like a flight search ({}); planning multiple targets", route);
                steps = Some(self.multi_target_steps(&route, goal).await);
            } else {
                steps = Some(normalized);
            }
        }

        let steps = match steps {
            Some(steps) => steps,
            None => self.generate(intent, params).await?,
        };

        let steps = optimize(steps);
        let mut plan = ExecutionPlan::new(goal, steps);
        plan.required_resources = required_resources(&plan.steps, self.config.max_browsers);
        plan.fallback_strategies = fallback_strategies();
        plan.estimated_duration_ms = estimate_duration(&plan.steps);
        plan.validate()?;
        debug!(
            "Planned {} steps (~{}ms) for '{}'",
            plan.steps.len(),
            plan.estimated_duration_ms,
            goal
        );
        Ok(plan)
    }

    async fn generate(
        &self,
        intent: &AutomationIntent,
        params: &CommandParameters,
    ) -> Result<Vec<AutomationStep>, PlannerError> {
        if matches!(intent.kind, IntentKind::Search | IntentKind::Research) {
            let text = std::iter::once(intent.description.as_str())
                .chain(params.search_terms.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            if let Some(route) = classify_route(&text).filter(|r| r.origin.is_some()) {
                info!("Detected flight route {}", route);
                return Ok(self.multi_target_steps(&route, &intent.description).await);
            }
        }
        generators::generate(intent, params)
            .ok_or_else(|| PlannerError::UnsupportedIntent(intent.kind.as_str().to_string()))
    }

    /// Converts classifier-suggested actions into steps. Unknown action types
    /// and element steps without any locator are dropped.
    pub fn normalize_actions(&self, actions: &[RawAction], goal: &str) -> Vec<AutomationStep> {
        let mut steps = Vec::new();
        for action in actions {
            let Some(kind) = StepKind::parse_loose(&action.kind) else {
                warn!("Skipping unknown action type '{}'", action.kind);
                continue;
            };
            let mut target = match &action.target {
                Some(RawTarget::Css(css)) => ElementSelector::css(css),
                Some(RawTarget::Selector(sel)) => sel.clone(),
                None => ElementSelector::default(),
            };
            if !target.has_locator() {
                if targets_page(kind) {
                    target = ElementSelector::page();
                } else {
                    warn!("Skipping {} action without a target", kind);
                    continue;
                }
            }
            let description = action
                .description
                .clone()
                .unwrap_or_else(|| format!("{} {}", kind, target.describe()));
            let mut step = AutomationStep::new(kind, target, description);
            if let Some(timeout) = action.timeout.filter(|t| *t > 0) {
                step = step.with_timeout(timeout);
            }
            if let Some(retries) = action.retries {
                step = step.with_retries(retries);
            }
            step.value = match kind {
                StepKind::Navigate => Some(navigate_destination(action, &step, goal)),
                _ => action.value.clone(),
            };
            steps.push(step);
        }

        if steps.is_empty() {
            return steps;
        }
        let first_nav = match steps.iter().position(|s| s.kind == StepKind::Navigate) {
            Some(i) => i,
            None => {
                steps.insert(0, AutomationStep::navigate(synthesize_url(goal), "Open start page"));
                0
            }
        };
        steps.insert(
            first_nav + 1,
            AutomationStep::wait_for(
                ElementSelector::page(),
                generators::PAGE_SETTLE_MS,
                "Wait for page load",
            ),
        );
        steps
    }

    /// One segment per chosen site.
    pub async fn multi_target_steps(
        &self,
        route: &RouteIntent,
        search_text: &str,
    ) -> Vec<AutomationStep> {
        let visits = self.choose_sites(route, search_text).await;
        info!(
            "Targets for {}: {}",
            route,
            visits
                .iter()
                .map(|v| v.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        visits
            .iter()
            .flat_map(|visit| sites::site_steps(visit, route))
            .collect()
    }

    /// Asks the site selector for a shortlist. Any failure, or too few usable
    /// entries, yields the static route-aware default list instead.
    pub async fn choose_sites(&self, route: &RouteIntent, search_text: &str) -> Vec<SiteVisit> {
        if let Some(selector) = &self.selector {
            match selector.select_sites(search_text, route).await {
                Ok(raw) => match parse_site_choices(&raw) {
                    Ok(choices) => {
                        let mut visits = self.visits_from_choices(choices, route);
                        if visits.len() >= self.config.min_sites {
                            visits.truncate(self.config.max_sites);
                            return visits;
                        }
                        warn!(
                            "Site selector returned {} usable site(s); using defaults",
                            visits.len()
                        );
                    }
                    Err(e) => warn!("Unparsable site selector reply: {}", e),
                },
                Err(e) => warn!("Site selector failed: {}", e),
            }
        }
        self.sites
            .default_shortlist(route)
            .into_iter()
            .map(|profile| self.sites.visit(profile, route))
            .collect()
    }

    fn visits_from_choices(
        &self,
        choices: Vec<SiteChoice>,
        route: &RouteIntent,
    ) -> Vec<SiteVisit> {
        let mut seen = HashSet::new();
        let mut visits = Vec::new();
        for choice in choices {
            let known = self
                .sites
                .by_url(&choice.url)
                .or_else(|| self.sites.by_name(&choice.name));
            let visit = match known {
                Some(profile) => self.sites.visit(profile, route),
                None => match Url::parse(&choice.url) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => SiteVisit {
                        name: choice.name.clone(),
                        url: choice.url.clone(),
                        profile: None,
                    },
                    _ => {
                        debug!("Ignoring site choice '{}' without a usable URL", choice.name);
                        continue;
                    }
                },
            };
            let identity = visit
                .profile
                .as_ref()
                .map(|p| p.key.to_string())
                .unwrap_or_else(|| visit.url.clone());
            if seen.insert(identity) {
                visits.push(visit);
            }
        }
        visits
    }
}

fn targets_page(kind: StepKind) -> bool {
    matches!(
        kind,
        StepKind::Navigate
            | StepKind::Wait
            | StepKind::Screenshot
            | StepKind::AnalyzePage
            | StepKind::KeyPress
            | StepKind::SmartFill
            | StepKind::CaptchaCheck
    )
}

fn as_url(value: &str) -> Option<String> {
    let v = value.trim();
    if v.starts_with("http://") || v.starts_with("https://") {
        return Some(v.to_string());
    }
    if !v.is_empty() && !v.contains(char::is_whitespace) && v.contains('.') {
        return Some(format!("https://{}", v));
    }
    None
}

fn navigate_destination(action: &RawAction, step: &AutomationStep, goal: &str) -> String {
    if let Some(url) = action.url.as_deref().and_then(as_url) {
        return url;
    }
    if let Some(url) = action.value.as_deref().and_then(as_url) {
        return url;
    }
    let text = [
        step.target.text.as_deref(),
        action.value.as_deref(),
        action.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|t| !t.trim().is_empty())
    .unwrap_or(goal);
    synthesize_url(text)
}

/// Route named by the first navigate's target text or URL, if any.
fn first_navigate_route(steps: &[AutomationStep]) -> Option<RouteIntent> {
    let nav = steps.iter().find(|s| s.kind == StepKind::Navigate)?;
    let mut parts: Vec<String> = Vec::new();
    if let Some(url) = nav.url().and_then(|u| Url::parse(u).ok()) {
        parts.extend(url.query_pairs().map(|(_, v)| v.into_owned()));
        parts.push(url.path().to_string());
    }
    if let Some(text) = &nav.target.text {
        parts.push(text.clone());
    }
    classify_route(&parts.join(" "))
}

/// Collapses consecutive navigates to the same URL, keeping the first.
pub fn optimize(steps: Vec<AutomationStep>) -> Vec<AutomationStep> {
    let mut out: Vec<AutomationStep> = Vec::with_capacity(steps.len());
    for step in steps {
        if step.kind == StepKind::Navigate
            && let Some(prev) = out.last()
            && prev.kind == StepKind::Navigate
            && prev.url() == step.url()
        {
            debug!("Dropping duplicate navigate to {:?}", step.url());
            continue;
        }
        out.push(step);
    }
    out
}

pub fn required_resources(steps: &[AutomationStep], max_browsers: u64) -> Vec<ResourceRequirement> {
    let count = |kind: StepKind| steps.iter().filter(|s| s.kind == kind).count() as u64;
    let navigates = count(StepKind::Navigate);
    let extracts = count(StepKind::Extract);
    vec![
        ResourceRequirement::new(
            ResourceKind::Browser,
            navigates.clamp(1, max_browsers.max(1)),
            "instances",
        ),
        ResourceRequirement::new(ResourceKind::Memory, 256 + 32 * steps.len() as u64, "MB"),
        ResourceRequirement::new(ResourceKind::Network, 2 * navigates + extracts, "MB"),
    ]
}

pub fn fallback_strategies() -> Vec<FallbackStrategy> {
    vec![
        FallbackStrategy {
            condition: FallbackCondition::ElementNotFound,
            alternative_steps: vec![AutomationStep::wait_for(
                ElementSelector::page(),
                2000,
                "Give the page more time",
            )],
            retry_failed_step: true,
        },
        FallbackStrategy {
            condition: FallbackCondition::Timeout,
            alternative_steps: vec![AutomationStep::screenshot("Capture page after timeout")],
            retry_failed_step: false,
        },
    ]
}

pub fn estimate_duration(steps: &[AutomationStep]) -> u64 {
    steps
        .iter()
        .map(|s| match s.kind {
            StepKind::Navigate => 5000,
            StepKind::Wait => s.timeout_ms,
            StepKind::Click | StepKind::Type => 1000,
            StepKind::Extract => 3000,
            StepKind::Screenshot => 2000,
            _ => 1000,
        })
        .sum()
}
