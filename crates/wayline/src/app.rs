//! Wiring from configuration to a ready-to-run [`Automation`].

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wayline_bridge::AgentBridgeProvider;
use wayline_engine::autonomous::AutonomousProvider;
use wayline_engine::config::{ConfigLoader, WaylineConfig};
use wayline_engine::engine::{EngineFactory, EngineKind, SharedEngine};
use wayline_engine::services::{HttpAdvisor, HttpClassifier, HttpSiteSelector, JsonDirSink};
use wayline_engine::{Automation, ExecutionPlanner, MultiTargetOrchestrator, StepExecutor};
use wayline_h::DirectDriverProvider;

/// Command-line settings that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub engine: Option<EngineKind>,
    pub visible: bool,
    pub timeout_ms: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(&self, config: &mut WaylineConfig) {
        if let Some(kind) = self.engine {
            config.engine.kind = Some(kind);
        }
        if self.visible {
            config.engine.headless = false;
        }
        if let Some(timeout) = self.timeout_ms {
            config.engine.timeout_ms = timeout;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
    }
}

pub async fn load_config(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<WaylineConfig> {
    let mut config = match path {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    ConfigLoader::apply_env(&mut config)?;
    overrides.apply(&mut config);
    config.engine.validate()?;
    Ok(config)
}

/// Registers every engine this build ships. The autonomous engine is only
/// offered when an advisor endpoint is configured.
pub fn engine_factory(config: &WaylineConfig) -> anyhow::Result<EngineFactory> {
    let executor = StepExecutor::new(config.executor.to_executor_config());
    let direct = Arc::new(DirectDriverProvider::new(executor));

    let mut factory = EngineFactory::new();
    factory.register(direct.clone());
    factory.register(Arc::new(AgentBridgeProvider::new(
        config.engine.bridge_command.clone(),
    )));
    if let Some(url) = &config.services.advisor_url {
        let advisor = HttpAdvisor::new(url.as_str(), config.services.request_timeout())?;
        factory.register(Arc::new(AutonomousProvider::new(direct, Arc::new(advisor))));
    }
    Ok(factory)
}

pub fn automation(
    config: &WaylineConfig,
    engine: SharedEngine,
    kind: EngineKind,
) -> anyhow::Result<Automation> {
    let timeout = config.services.request_timeout();

    let mut planner = ExecutionPlanner::new(config.planner.to_planner_config());
    if let Some(url) = &config.services.site_selector_url {
        planner = planner.with_site_selector(Arc::new(HttpSiteSelector::new(url.as_str(), timeout)?));
    }

    let mut automation = Automation::new(engine, kind)
        .with_planner(planner)
        .with_orchestrator(MultiTargetOrchestrator::new(
            config.orchestrator.to_orchestrator_config(),
        ));
    if let Some(url) = &config.services.classifier_url {
        automation = automation.with_classifier(Arc::new(HttpClassifier::new(url.as_str(), timeout)?));
    }
    if let Some(dir) = &config.output_dir {
        automation = automation.with_sink(Arc::new(JsonDirSink::new(dir.clone())));
    }
    Ok(automation)
}
