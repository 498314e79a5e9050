//! Sequential step loop shared by the in-process engines.

use crate::executor::StepExecutor;
use crate::page::Page;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use wayline_common::{
    AutomationStep, ExecutionPlan, ExtractedData, FallbackCondition, Screenshot, StepError,
    StepKind, StepResult, TargetState,
};

/// Cooperative cancellation flag, checked at step and target boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<StopSignal>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that trips with `self` but can also be stopped on its own.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::default(),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.parent.as_ref().is_some_and(|p| p.is_stopped())
    }
}

/// Progress notifications emitted while a plan runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StepStarted {
        index: usize,
        step_id: String,
        description: String,
    },
    StepFinished {
        index: usize,
        result: StepResult,
    },
    FallbackApplied {
        step_id: String,
        condition: FallbackCondition,
    },
    TargetChanged {
        name: String,
        state: TargetState,
    },
    Stopped,
}

pub type EventSender = UnboundedSender<RunEvent>;

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub stop: StopSignal,
    pub events: Option<EventSender>,
}

impl RunContext {
    pub fn new(stop: StopSignal) -> Self {
        Self { stop, events: None }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Receivers may go away at any time; a closed channel is not an error.
    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Everything one engine run produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub step_results: Vec<StepResult>,
    pub extracted: Vec<ExtractedData>,
    pub screenshots: Vec<Screenshot>,
    pub errors: Vec<String>,
    pub stopped: bool,
    pub success: bool,
    /// Set by a failed navigate or a detected challenge.
    pub critical_failure: bool,
}

impl RunOutcome {
    /// Folds a step result into the outcome.
    pub fn record(&mut self, step: &AutomationStep, result: StepResult) {
        self.extracted.extend(result.extracted().iter().cloned());
        if let Some(png) = &result.screenshot {
            self.screenshots.push(Screenshot::from_png(&step.id, png));
        }
        if let Some(e) = &result.error {
            self.errors.push(format!("{}: {}", step.description, e));
            if step.kind == StepKind::Navigate || ends_run(e) {
                self.critical_failure = true;
            }
        }
        self.step_results.push(result);
    }

    /// Errors of failed steps, in order.
    pub fn step_errors(&self) -> impl Iterator<Item = &StepError> {
        self.step_results.iter().filter_map(|r| r.error.as_ref())
    }

    pub fn failed_steps(&self) -> usize {
        self.step_results.iter().filter(|r| !r.success).count()
    }

    /// A run succeeds when every step did, or when nothing critical failed
    /// and data was still extracted.
    pub fn finish(mut self) -> Self {
        let clean = self.failed_steps() == 0 && !self.step_results.is_empty();
        self.success = !self.stopped
            && (clean || (!self.critical_failure && !self.extracted.is_empty()));
        self
    }
}

/// A challenge page will not let any later step through.
fn ends_run(error: &StepError) -> bool {
    matches!(error, StepError::Blocked { .. })
}

#[derive(Debug, Clone, Default)]
pub struct PlanRunner {
    executor: StepExecutor,
}

impl PlanRunner {
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        page: &mut dyn Page,
        ctx: &RunContext,
    ) -> RunOutcome {
        info!("Running plan {} ({} steps)", plan.id, plan.steps.len());
        let mut outcome = RunOutcome::default();

        for (index, step) in plan.steps.iter().enumerate() {
            if ctx.stop.is_stopped() {
                info!("Stop requested; {} step(s) left unrun", plan.steps.len() - index);
                outcome.stopped = true;
                ctx.emit(RunEvent::Stopped);
                break;
            }
            ctx.emit(RunEvent::StepStarted {
                index,
                step_id: step.id.clone(),
                description: step.description.clone(),
            });

            let mut result = self.executor.execute(step, page).await;
            if !result.success
                && let Some(strategy) = result
                    .error
                    .as_ref()
                    .and_then(StepError::fallback_condition)
                    .and_then(|c| plan.fallback_for(c))
            {
                debug!("Applying {:?} fallback to step {}", strategy.condition, step.id);
                ctx.emit(RunEvent::FallbackApplied {
                    step_id: step.id.clone(),
                    condition: strategy.condition,
                });
                for alternative in &strategy.alternative_steps {
                    let alt = self.executor.execute(alternative, page).await;
                    if let Some(png) = &alt.screenshot {
                        outcome
                            .screenshots
                            .push(Screenshot::from_png(&alternative.id, png));
                    }
                }
                if strategy.retry_failed_step {
                    result = self.executor.execute(step, page).await;
                }
            }

            let halt = result.error.as_ref().is_some_and(ends_run);
            ctx.emit(RunEvent::StepFinished {
                index,
                result: result.clone(),
            });
            outcome.record(step, result);
            if halt {
                warn!("Abandoning plan after '{}'", step.description);
                break;
            }
        }

        let outcome = outcome.finish();
        info!(
            "Plan {} finished: success={}, {} item(s), {} error(s)",
            plan.id,
            outcome.success,
            outcome.extracted.len(),
            outcome.errors.len()
        );
        outcome
    }
}
