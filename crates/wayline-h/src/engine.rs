use crate::cdp::CdpClient;
use crate::page::CdpPage;
use async_trait::async_trait;
use tracing::info;
use wayline_common::ExecutionPlan;
use wayline_engine::engine::{Engine, EngineConfig, EngineError, EngineKind, EngineProvider};
use wayline_engine::page::Page;
use wayline_engine::runner::{PlanRunner, RunContext, RunOutcome};
use wayline_engine::StepExecutor;

const SELF_TEST_PAGE: &str =
    "data:text/html,<html><head><title>wayline</title></head><body>ok</body></html>";

/// Runs plans step by step against a locally launched Chromium.
pub struct DirectDriverEngine {
    config: EngineConfig,
    runner: PlanRunner,
    client: Option<CdpClient>,
    page: Option<CdpPage>,
}

impl DirectDriverEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            runner: PlanRunner::default(),
            client: None,
            page: None,
        }
    }

    pub fn with_executor(mut self, executor: StepExecutor) -> Self {
        self.runner = PlanRunner::new(executor);
        self
    }

    pub fn is_launched(&self) -> bool {
        self.page.is_some()
    }
}

#[async_trait]
impl Engine for DirectDriverEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DirectDriver
    }

    async fn launch(&mut self) -> Result<(), EngineError> {
        if self.client.is_some() {
            return Ok(());
        }
        info!("Launching direct driver (Chromium)...");
        let client = CdpClient::launch(&self.config)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;
        self.page = Some(CdpPage::new(client.page.clone()));
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.page = None;
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| EngineError::Protocol(e.to_string()))?;
        }
        Ok(())
    }

    async fn self_test(&mut self) -> Result<(), EngineError> {
        let page = self.page.as_mut().ok_or(EngineError::NotLaunched)?;
        let nav = page.navigate(SELF_TEST_PAGE).await?;
        if nav.title != "wayline" {
            return Err(EngineError::Unavailable(format!(
                "self-test page reported title '{}'",
                nav.title
            )));
        }
        Ok(())
    }

    async fn run(
        &mut self,
        plan: &ExecutionPlan,
        ctx: &RunContext,
    ) -> Result<RunOutcome, EngineError> {
        let page = self.page.as_mut().ok_or(EngineError::NotLaunched)?;
        Ok(self.runner.run(plan, page, ctx).await)
    }

    fn page(&mut self) -> Option<&mut dyn Page> {
        self.page.as_mut().map(|p| p as &mut dyn Page)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectDriverProvider {
    executor: StepExecutor,
}

impl DirectDriverProvider {
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }
}

impl EngineProvider for DirectDriverProvider {
    fn kind(&self) -> EngineKind {
        EngineKind::DirectDriver
    }

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(
            DirectDriverEngine::new(config.clone()).with_executor(self.executor.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_before_launch_is_rejected() {
        let mut engine = DirectDriverEngine::new(EngineConfig::default());
        let plan = ExecutionPlan::new("noop", Vec::new());
        assert!(matches!(
            engine.run(&plan, &RunContext::default()).await,
            Err(EngineError::NotLaunched)
        ));
        assert!(engine.page().is_none());
        assert!(engine.close().await.is_ok());
    }

    #[test]
    fn test_provider_builds_direct_driver() {
        let provider = DirectDriverProvider::default();
        let engine = provider.create(&EngineConfig::default()).unwrap();
        assert_eq!(engine.kind(), EngineKind::DirectDriver);
    }
}
