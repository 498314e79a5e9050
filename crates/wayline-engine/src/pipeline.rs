//! Command in, [`AutomationResult`] out.

use crate::engine::{EngineKind, SharedEngine};
use crate::orchestrator::MultiTargetOrchestrator;
use crate::planner::{ExecutionPlanner, PlannerError};
use crate::runner::RunContext;
use crate::services::{IntentClassifier, ResultSink, RuleClassifier};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;
use wayline_common::{AutomationResult, Classification, ExecutionPlan, RunMetadata};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Plan(#[from] PlannerError),

    #[error("Empty command")]
    EmptyCommand,
}

pub struct Automation {
    classifier: Option<Arc<dyn IntentClassifier>>,
    rules: RuleClassifier,
    planner: ExecutionPlanner,
    orchestrator: MultiTargetOrchestrator,
    engine: SharedEngine,
    engine_kind: EngineKind,
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl Automation {
    pub fn new(engine: SharedEngine, engine_kind: EngineKind) -> Self {
        Self {
            classifier: None,
            rules: RuleClassifier::new(),
            planner: ExecutionPlanner::default(),
            orchestrator: MultiTargetOrchestrator::default(),
            engine,
            engine_kind,
            sinks: Vec::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_planner(mut self, planner: ExecutionPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: MultiTargetOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    /// Classifies `command`, preferring the configured classifier and falling
    /// back to keyword rules when it fails.
    pub async fn classify(&self, command: &str) -> Result<Classification, PipelineError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(PipelineError::EmptyCommand);
        }
        if let Some(classifier) = &self.classifier {
            match classifier.classify(command).await {
                Ok(classification) => return Ok(classification),
                Err(e) => warn!("Classifier failed, using keyword rules: {}", e),
            }
        }
        Ok(self.rules.classify_text(command))
    }

    pub async fn plan(&self, command: &str) -> Result<(Classification, ExecutionPlan), PipelineError> {
        let classification = self.classify(command).await?;
        info!(
            "Classified as {} ({:.0}% confidence)",
            classification.intent.kind.as_str(),
            classification.confidence * 100.0
        );
        let plan = self
            .planner
            .create_plan(
                command.trim(),
                &classification.intent,
                &classification.parameters,
                classification.suggested_actions.as_deref(),
            )
            .await?;
        Ok((classification, plan))
    }

    /// Plans and executes `command`. Execution failures are reported inside
    /// the result; only classification and planning errors are returned.
    pub async fn run(&self, command: &str, ctx: &RunContext) -> Result<AutomationResult, PipelineError> {
        let (classification, plan) = self.plan(command).await?;
        let result = self.execute(command.trim(), &classification, plan, ctx).await;
        self.store(&result).await;
        Ok(result)
    }

    pub async fn execute(
        &self,
        command: &str,
        classification: &Classification,
        plan: ExecutionPlan,
        ctx: &RunContext,
    ) -> AutomationResult {
        let started = Instant::now();
        let mut result = AutomationResult {
            id: Uuid::new_v4().to_string(),
            command: command.to_string(),
            intent: classification.intent.clone(),
            execution_plan: plan.clone(),
            extracted_data: Vec::new(),
            screenshots: Vec::new(),
            duration_ms: 0,
            success: false,
            errors: Vec::new(),
            timestamp: Utc::now(),
            metadata: RunMetadata {
                engine: self.engine_kind.to_string(),
                ..Default::default()
            },
        };

        if is_multi_target(&plan) {
            let run = self.orchestrator.run(&plan, self.engine.clone(), ctx).await;
            result.metadata.multi_target = true;
            result.metadata.targets = run.targets;
            result.metadata.stopped = run.stopped;
            result.metadata.step_results = run.step_results;
            result.extracted_data = run.extracted;
            result.screenshots = run.screenshots;
            result.errors = run.errors;
            result.success = run.success;
        } else {
            let mut engine = self.engine.lock().await;
            match engine.run(&plan, ctx).await {
                Ok(outcome) => {
                    result.metadata.stopped = outcome.stopped;
                    result.metadata.step_results = outcome.step_results;
                    result.extracted_data = outcome.extracted;
                    result.screenshots = outcome.screenshots;
                    result.errors = outcome.errors;
                    result.success = outcome.success;
                }
                Err(e) => {
                    warn!("Engine run failed: {}", e);
                    result.errors.push(e.to_string());
                }
            }
        }

        let steps = &result.metadata.step_results;
        result.metadata.steps_total = steps.len();
        result.metadata.steps_succeeded = steps.iter().filter(|r| r.success).count();
        result.metadata.steps_failed = steps.len() - result.metadata.steps_succeeded;
        result.duration_ms = started.elapsed().as_millis() as u64;
        info!("{}", result.summary());
        result
    }

    async fn store(&self, result: &AutomationResult) {
        for sink in &self.sinks {
            if let Err(e) = sink.store(result).await {
                warn!("Failed to store result {}: {}", result.id, e);
            }
        }
    }
}

/// Plans visiting more than one site go through the orchestrator. Several
/// pages of the same site stay a single-target run.
pub fn is_multi_target(plan: &ExecutionPlan) -> bool {
    plan.target_urls()
        .into_iter()
        .map(site_of)
        .collect::<HashSet<_>>()
        .len()
        > 1
}

fn site_of(url: &str) -> String {
    match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
        Some(host) => host.trim_start_matches("www.").to_string(),
        None => url.to_string(),
    }
}
