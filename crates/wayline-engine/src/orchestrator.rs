//! Runs a multi-site plan one target at a time.
//!
//! Targets are reordered by reliability rank, bot-hostile ones are skipped,
//! and each sub-plan races a per-target timeout on a spawned task that holds
//! the engine lock. A timed-out task is detached rather than aborted: its
//! stop signal is tripped so it ends at the next step boundary, and the next
//! target waits for the lock before its own clock starts.

use crate::engine::SharedEngine;
use crate::planner::{estimate_duration, required_resources, sites::SiteRegistry};
use crate::runner::{RunContext, RunEvent, RunOutcome};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;
use wayline_common::{
    AutomationStep, ExecutionPlan, ExtractedData, FailureTag, Screenshot, StepError, StepKind,
    StepResult, TargetReport, TargetState,
};

const BOT_KEYWORDS: &[&str] = &["captcha", "bot", "verification", "challenge", "blocked"];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub target_timeout: Duration,
    pub inter_target_delay: Duration,
    pub skip_bot_hostile: bool,
    pub early_stop: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            target_timeout: Duration::from_secs(120),
            inter_target_delay: Duration::from_millis(3000),
            skip_bot_hostile: true,
            early_stop: true,
        }
    }
}

/// One destination with its own sub-plan.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub url: String,
    pub rank: Option<u32>,
    pub bot_hostile: bool,
    pub plan: ExecutionPlan,
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratedRun {
    pub targets: Vec<TargetReport>,
    pub step_results: Vec<StepResult>,
    pub extracted: Vec<ExtractedData>,
    pub screenshots: Vec<Screenshot>,
    pub errors: Vec<String>,
    pub success: bool,
    pub stopped: bool,
}

pub struct MultiTargetOrchestrator {
    config: OrchestratorConfig,
    sites: SiteRegistry,
}

impl Default for MultiTargetOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl MultiTargetOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            sites: SiteRegistry::builtin(),
        }
    }

    pub fn with_sites(mut self, sites: SiteRegistry) -> Self {
        self.sites = sites;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Cuts `plan` into per-target sub-plans ordered by rank, unranked last.
    pub fn targets(&self, plan: &ExecutionPlan) -> Vec<Target> {
        let mut targets: Vec<Target> = sub_plans(plan)
            .into_iter()
            .map(|steps| self.identify(plan, steps))
            .collect();
        targets.sort_by_key(|t| t.rank.unwrap_or(u32::MAX));
        targets
    }

    fn identify(&self, plan: &ExecutionPlan, steps: Vec<AutomationStep>) -> Target {
        let url = steps
            .first()
            .and_then(|s| s.url())
            .unwrap_or_default()
            .to_string();
        let mut sub = ExecutionPlan::new(plan.goal.clone(), steps);
        sub.fallback_strategies = plan.fallback_strategies.clone();
        sub.required_resources = required_resources(&sub.steps, 1);
        sub.estimated_duration_ms = estimate_duration(&sub.steps);

        match self.sites.by_url(&url) {
            Some(profile) => Target {
                name: profile.name.to_string(),
                url,
                rank: profile.rank,
                bot_hostile: profile.bot_hostile,
                plan: sub,
            },
            None => Target {
                name: Url::parse(&url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
                    .unwrap_or_else(|| url.clone()),
                url,
                rank: None,
                bot_hostile: false,
                plan: sub,
            },
        }
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        engine: SharedEngine,
        ctx: &RunContext,
    ) -> OrchestratedRun {
        let targets = self.targets(plan);
        let mut run = OrchestratedRun {
            targets: targets
                .iter()
                .map(|t| {
                    let mut report = TargetReport::pending(&t.name, &t.url);
                    report.rank = t.rank;
                    report.bot_hostile = t.bot_hostile;
                    report
                })
                .collect(),
            ..Default::default()
        };
        info!("Orchestrating {} targets", targets.len());

        let mut succeeded = 0;
        let mut attempted_any = false;
        for (i, target) in targets.iter().enumerate() {
            if ctx.stop.is_stopped() {
                info!("Stop requested before {}", target.name);
                run.stopped = true;
                ctx.emit(RunEvent::Stopped);
                break;
            }

            if self.config.skip_bot_hostile && target.bot_hostile {
                info!("Skipping {} (bot_detection_avoidance)", target.name);
                let report = &mut run.targets[i];
                report.transition(TargetState::Skipped);
                report.error = Some("bot_detection_avoidance".to_string());
                run.errors
                    .push(format!("{}: skipped (bot_detection_avoidance)", target.name));
                ctx.emit(RunEvent::TargetChanged {
                    name: target.name.clone(),
                    state: TargetState::Skipped,
                });
                continue;
            }

            if attempted_any && !self.config.inter_target_delay.is_zero() {
                tokio::time::sleep(self.config.inter_target_delay).await;
            }
            attempted_any = true;

            run.targets[i].transition(TargetState::Attempting);
            ctx.emit(RunEvent::TargetChanged {
                name: target.name.clone(),
                state: TargetState::Attempting,
            });
            let started = Instant::now();
            let result = self.attempt(target, engine.clone(), ctx).await;
            let report = &mut run.targets[i];
            report.duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(outcome) if outcome.success => {
                    info!(
                        "{} succeeded with {} item(s)",
                        target.name,
                        outcome.extracted.len()
                    );
                    report.transition(TargetState::Succeeded);
                    report.extracted = outcome.extracted.len();
                    succeeded += 1;
                    run.step_results.extend(outcome.step_results);
                    run.extracted.extend(outcome.extracted);
                    run.screenshots.extend(outcome.screenshots);
                }
                Ok(outcome) => {
                    let tag = tag_outcome(&outcome);
                    let reason = outcome
                        .errors
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "no usable results".to_string());
                    fail(&mut run.errors, report, &target.name, tag, reason);
                    run.step_results.extend(outcome.step_results);
                    run.screenshots.extend(outcome.screenshots);
                }
                Err((tag, reason)) => fail(&mut run.errors, report, &target.name, tag, reason),
            }
            ctx.emit(RunEvent::TargetChanged {
                name: target.name.clone(),
                state: run.targets[i].state,
            });

            if self.config.early_stop && succeeded > 0 && !run.extracted.is_empty() {
                let left = targets.len() - i - 1;
                if left > 0 {
                    info!("Early stop: {} target(s) left pending", left);
                }
                break;
            }
        }

        run.success = succeeded > 0;
        run
    }

    async fn attempt(
        &self,
        target: &Target,
        engine: SharedEngine,
        ctx: &RunContext,
    ) -> Result<RunOutcome, (FailureTag, String)> {
        let plan = target.plan.clone();
        let stop = ctx.stop.child();
        let task_ctx = RunContext {
            stop: stop.clone(),
            events: ctx.events.clone(),
        };
        let (locked_tx, locked_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut engine = engine.lock().await;
            let _ = locked_tx.send(());
            engine.run(&plan, &task_ctx).await
        });

        let budget = self.config.target_timeout;
        match tokio::time::timeout(budget, locked_rx).await {
            Ok(_) => {}
            Err(_) => {
                stop.stop();
                warn!("{} could not get the engine within {}ms", target.name, budget.as_millis());
                return Err((
                    FailureTag::Timeout,
                    format!("engine busy for {}ms", budget.as_millis()),
                ));
            }
        }

        match tokio::time::timeout(budget, handle).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => {
                let reason = e.to_string();
                Err((tag_text(&reason), reason))
            }
            Ok(Err(e)) => Err((FailureTag::Other, format!("target task failed: {}", e))),
            Err(_) => {
                stop.stop();
                warn!(
                    "{} exceeded {}ms; stopping its task at the next step",
                    target.name,
                    budget.as_millis()
                );
                Err((
                    FailureTag::Timeout,
                    format!("timed out after {}ms", budget.as_millis()),
                ))
            }
        }
    }
}

fn fail(
    errors: &mut Vec<String>,
    report: &mut TargetReport,
    name: &str,
    tag: FailureTag,
    reason: String,
) {
    warn!("{} failed ({:?}): {}", name, tag, reason);
    let message = match tag {
        FailureTag::BotDetection => format!("Bot detection encountered - {}", reason),
        _ => reason,
    };
    errors.push(format!("{}: {}", name, message));
    report.transition(TargetState::Failed);
    report.failure = Some(tag);
    report.error = Some(message);
}

/// Classifies a free-text failure reason.
pub fn tag_text(text: &str) -> FailureTag {
    let lower = text.to_lowercase();
    if BOT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        FailureTag::BotDetection
    } else if lower.contains("timed out") || lower.contains("timeout") {
        FailureTag::Timeout
    } else {
        FailureTag::Other
    }
}

fn tag_outcome(outcome: &RunOutcome) -> FailureTag {
    if outcome
        .step_errors()
        .any(|e| matches!(e, StepError::Blocked { .. }))
    {
        return FailureTag::BotDetection;
    }
    outcome
        .errors
        .iter()
        .map(|e| tag_text(e))
        .find(|t| *t != FailureTag::Other)
        .unwrap_or(FailureTag::Other)
}

/// Splits a plan into per-target step lists.
///
/// Each segment starts at a navigate. When every segment carries its own
/// steps each target keeps its segment; otherwise every navigate is followed
/// by all non-navigate steps of the plan.
pub fn sub_plans(plan: &ExecutionPlan) -> Vec<Vec<AutomationStep>> {
    let mut segments: Vec<Vec<AutomationStep>> = Vec::new();
    for step in &plan.steps {
        if step.kind == StepKind::Navigate {
            segments.push(vec![step.clone()]);
        } else if let Some(segment) = segments.last_mut() {
            segment.push(step.clone());
        } else {
            debug!("Dropping step '{}' that precedes any navigate", step.description);
        }
    }
    if segments.iter().all(|s| s.len() > 1) {
        return segments;
    }
    let shared: Vec<AutomationStep> = plan
        .steps
        .iter()
        .filter(|s| s.kind != StepKind::Navigate)
        .cloned()
        .collect();
    segments
        .into_iter()
        .map(|mut segment| {
            segment.truncate(1);
            segment.extend(shared.iter().cloned());
            segment
        })
        .collect()
}
