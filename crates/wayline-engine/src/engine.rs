use crate::page::{Page, PageError};
use crate::runner::{RunContext, RunOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use wayline_common::ExecutionPlan;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not launched")]
    NotLaunched,

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    DirectDriver,
    AgentBridge,
    Autonomous,
}

impl EngineKind {
    /// Most capable first.
    pub const PREFERENCE: [EngineKind; 3] = [
        EngineKind::Autonomous,
        EngineKind::AgentBridge,
        EngineKind::DirectDriver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::DirectDriver => "direct_driver",
            EngineKind::AgentBridge => "agent_bridge",
            EngineKind::Autonomous => "autonomous",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "direct_driver" | "direct" | "headless" | "cdp" => Ok(EngineKind::DirectDriver),
            "agent_bridge" | "bridge" => Ok(EngineKind::AgentBridge),
            "autonomous" | "auto" => Ok(EngineKind::Autonomous),
            other => Err(format!("unknown engine kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("timeout {0}ms is outside [1000, 300000]")]
    Timeout(u64),

    #[error("viewport {width}x{height} is outside [100, 4000]")]
    Viewport { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine to use; when unset the factory recommends one.
    #[serde(default)]
    pub kind: Option<EngineKind>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Program and arguments that start the agent bridge.
    #[serde(default = "default_bridge_command")]
    pub bridge_command: Vec<String>,
    /// Advisor turns before the autonomous engine falls back to the plan.
    #[serde(default = "default_max_autonomous_steps")]
    pub max_autonomous_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: None,
            headless: default_headless(),
            timeout_ms: default_timeout_ms(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            user_agent: None,
            bridge_command: default_bridge_command(),
            max_autonomous_steps: default_max_autonomous_steps(),
        }
    }
}

fn default_headless() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    800
}

fn default_bridge_command() -> Vec<String> {
    vec![
        "python3".to_string(),
        "python-bridge/browser_use_bridge.py".to_string(),
    ]
}

fn default_max_autonomous_steps() -> usize {
    25
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(1000..=300_000).contains(&self.timeout_ms) {
            return Err(ConfigValidationError::Timeout(self.timeout_ms));
        }
        let in_range = |v: u32| (100..=4000).contains(&v);
        if !in_range(self.viewport_width) || !in_range(self.viewport_height) {
            return Err(ConfigValidationError::Viewport {
                width: self.viewport_width,
                height: self.viewport_height,
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A browser automation engine. Each engine exclusively owns its page.
#[async_trait]
pub trait Engine: Send {
    fn kind(&self) -> EngineKind;

    async fn launch(&mut self) -> Result<(), EngineError>;

    async fn close(&mut self) -> Result<(), EngineError>;

    /// Cheap end-to-end check run by availability probes after `launch`.
    async fn self_test(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn run(
        &mut self,
        plan: &ExecutionPlan,
        ctx: &RunContext,
    ) -> Result<RunOutcome, EngineError>;

    /// The live page, for engines that drive one in-process.
    fn page(&mut self) -> Option<&mut dyn Page> {
        None
    }
}

/// Engine shared between the pipeline and spawned per-target tasks.
pub type SharedEngine = Arc<tokio::sync::Mutex<Box<dyn Engine>>>;

pub fn shared(engine: Box<dyn Engine>) -> SharedEngine {
    Arc::new(tokio::sync::Mutex::new(engine))
}

/// Builds engines of one kind. Registered with [`EngineFactory`] by the binary.
pub trait EngineProvider: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError>;

    /// Static preconditions, such as a helper program being present.
    fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Invalid engine configuration: {0}")]
    Invalid(#[from] ConfigValidationError),

    #[error("No provider registered for {0}")]
    NoProvider(EngineKind),

    #[error("No engine could be started")]
    NoEngineAvailable,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct EngineFactory {
    providers: Vec<Arc<dyn EngineProvider>>,
    probe_timeout: Duration,
}

impl Default for EngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            probe_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Registers a provider, replacing any earlier one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn EngineProvider>) {
        self.providers.retain(|p| p.kind() != provider.kind());
        self.providers.push(provider);
    }

    fn provider(&self, kind: EngineKind) -> Option<&Arc<dyn EngineProvider>> {
        self.providers.iter().find(|p| p.kind() == kind)
    }

    pub fn create_engine(
        &self,
        kind: EngineKind,
        config: &EngineConfig,
    ) -> Result<Box<dyn Engine>, FactoryError> {
        config.validate()?;
        let provider = self.provider(kind).ok_or(FactoryError::NoProvider(kind))?;
        Ok(provider.create(config)?)
    }

    /// The direct driver is the baseline every installation has.
    pub fn is_available(&self, kind: EngineKind) -> bool {
        if kind == EngineKind::DirectDriver {
            return true;
        }
        self.provider(kind).is_some_and(|p| p.is_available())
    }

    /// The first kind in preference order that is available and passes a
    /// probe. The direct driver is the fallback and is not probed.
    pub async fn recommend(&self, config: &EngineConfig) -> EngineKind {
        for kind in EngineKind::PREFERENCE {
            if kind == EngineKind::DirectDriver {
                break;
            }
            if self.is_available(kind) && self.probe(kind, config).await {
                return kind;
            }
        }
        EngineKind::DirectDriver
    }

    /// Launches a throwaway engine, self-tests it and closes it again.
    pub async fn probe(&self, kind: EngineKind, config: &EngineConfig) -> bool {
        let mut engine = match self.create_engine(kind, config) {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Probe of {} failed to create engine: {}", kind, e);
                return false;
            }
        };
        let checked = tokio::time::timeout(self.probe_timeout, async {
            engine.launch().await?;
            engine.self_test().await
        })
        .await;
        let _ = engine.close().await;
        match checked {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Probe of {} failed: {}", kind, e);
                false
            }
            Err(_) => {
                warn!("Probe of {} timed out", kind);
                false
            }
        }
    }

    /// Creates and launches the requested engine, or the first engine in
    /// preference order that starts and passes its self-test. Unavailable
    /// engines fall through to the next kind.
    pub async fn launch_preferred(
        &self,
        config: &EngineConfig,
    ) -> Result<(EngineKind, Box<dyn Engine>), FactoryError> {
        config.validate()?;
        let order: Vec<EngineKind> = match config.kind {
            Some(kind) => std::iter::once(kind)
                .chain(
                    EngineKind::PREFERENCE
                        .into_iter()
                        .skip_while(|k| *k != kind)
                        .skip(1),
                )
                .collect(),
            None => EngineKind::PREFERENCE.to_vec(),
        };
        for kind in order {
            if !self.is_available(kind) {
                continue;
            }
            let mut engine = match self.create_engine(kind, config) {
                Ok(engine) => engine,
                Err(e) => {
                    warn!("Cannot create {} engine: {}", kind, e);
                    continue;
                }
            };
            let checked = tokio::time::timeout(self.probe_timeout, async {
                engine.launch().await?;
                engine.self_test().await
            })
            .await;
            match checked {
                Ok(Ok(())) => {
                    info!("Using {} engine", kind);
                    return Ok((kind, engine));
                }
                Ok(Err(e)) => warn!("{} engine failed to start, falling back: {}", kind, e),
                Err(_) => warn!("{} engine did not start in time, falling back", kind),
            }
            let _ = engine.close().await;
        }
        Err(FactoryError::NoEngineAvailable)
    }
}
