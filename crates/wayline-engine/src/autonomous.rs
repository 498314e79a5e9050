//! Advisor-driven engine layered over an in-process engine.
//!
//! Each turn the page is summarised and the [`ActionAdvisor`] picks the next
//! step. When the advisor errors, proposes an invalid step, or runs out of
//! turns, the deterministic plan is run on the inner engine instead.

use crate::engine::{Engine, EngineConfig, EngineError, EngineKind, EngineProvider};
use crate::executor::StepExecutor;
use crate::page::Page;
use crate::runner::{RunContext, RunEvent, RunOutcome};
use crate::services::{ActionAdvisor, Advice};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wayline_common::{ExecutionPlan, StepKind};

pub struct AutonomousEngine {
    inner: Box<dyn Engine>,
    advisor: Arc<dyn ActionAdvisor>,
    executor: StepExecutor,
    max_steps: usize,
}

impl AutonomousEngine {
    pub fn new(inner: Box<dyn Engine>, advisor: Arc<dyn ActionAdvisor>, max_steps: usize) -> Self {
        Self {
            inner,
            advisor,
            executor: StepExecutor::default(),
            max_steps,
        }
    }

    pub fn with_executor(mut self, executor: StepExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// `None` means the advisor loop gave up and the plan should run instead.
    async fn drive(&mut self, plan: &ExecutionPlan, ctx: &RunContext) -> Option<RunOutcome> {
        let page = self.inner.page()?;
        let mut outcome = RunOutcome::default();

        if let Some(first) = plan.steps.iter().find(|s| s.kind == StepKind::Navigate) {
            let result = self.executor.execute(first, page).await;
            let ok = result.success;
            outcome.record(first, result);
            if !ok {
                warn!("Autonomous start page failed to load");
                return None;
            }
        }

        for turn in 0..self.max_steps {
            if ctx.stop.is_stopped() {
                outcome.stopped = true;
                ctx.emit(RunEvent::Stopped);
                return Some(outcome.finish());
            }
            let observation = match page.analyze().await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Cannot observe page: {}", e);
                    return None;
                }
            };
            let advice = match self
                .advisor
                .next_step(&plan.goal, &observation, &outcome.step_results)
                .await
            {
                Ok(advice) => advice,
                Err(e) => {
                    warn!("Advisor failed on turn {}: {}", turn + 1, e);
                    return None;
                }
            };
            match advice {
                Advice::Done(summary) => {
                    info!("Advisor finished after {} turn(s): {}", turn, summary);
                    return Some(outcome.finish());
                }
                Advice::Act(step) => {
                    if let Err(e) = step.validate() {
                        warn!("Advisor proposed an invalid step: {}", e);
                        return None;
                    }
                    debug!("Turn {}: {}", turn + 1, step.description);
                    ctx.emit(RunEvent::StepStarted {
                        index: outcome.step_results.len(),
                        step_id: step.id.clone(),
                        description: step.description.clone(),
                    });
                    let result = self.executor.execute(&step, page).await;
                    ctx.emit(RunEvent::StepFinished {
                        index: outcome.step_results.len(),
                        result: result.clone(),
                    });
                    outcome.record(&step, result);
                }
            }
        }
        warn!("Advisor did not finish within {} turns", self.max_steps);
        None
    }
}

#[async_trait]
impl Engine for AutonomousEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Autonomous
    }

    async fn launch(&mut self) -> Result<(), EngineError> {
        self.inner.launch().await
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.inner.close().await
    }

    async fn self_test(&mut self) -> Result<(), EngineError> {
        self.advisor
            .ping()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        self.inner.self_test().await
    }

    async fn run(
        &mut self,
        plan: &ExecutionPlan,
        ctx: &RunContext,
    ) -> Result<RunOutcome, EngineError> {
        if let Some(outcome) = self.drive(plan, ctx).await {
            return Ok(outcome);
        }
        info!("Falling back to the deterministic plan");
        self.inner.run(plan, ctx).await
    }

    fn page(&mut self) -> Option<&mut dyn Page> {
        self.inner.page()
    }
}

/// Wraps another provider's engines with an advisor loop.
pub struct AutonomousProvider {
    inner: Arc<dyn EngineProvider>,
    advisor: Arc<dyn ActionAdvisor>,
}

impl AutonomousProvider {
    pub fn new(inner: Arc<dyn EngineProvider>, advisor: Arc<dyn ActionAdvisor>) -> Self {
        Self { inner, advisor }
    }
}

impl EngineProvider for AutonomousProvider {
    fn kind(&self) -> EngineKind {
        EngineKind::Autonomous
    }

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
        let inner = self.inner.create(config)?;
        Ok(Box::new(AutonomousEngine::new(
            inner,
            self.advisor.clone(),
            config.max_autonomous_steps,
        )))
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
