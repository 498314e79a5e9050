pub mod autonomous;
pub mod config;
pub mod engine;
pub mod executor;
pub mod fields;
pub mod orchestrator;
pub mod page;
pub mod pipeline;
pub mod planner;
pub mod resolver;
pub mod runner;
pub mod scripts;
pub mod services;

pub use engine::{
    ConfigValidationError, Engine, EngineConfig, EngineError, EngineFactory, EngineKind,
    EngineProvider, FactoryError, SharedEngine,
};
pub use executor::{ExecutorConfig, StepExecutor};
pub use orchestrator::{MultiTargetOrchestrator, OrchestratorConfig};
pub use page::{ElementHandle, Locator, NavigationInfo, Page, PageError};
pub use pipeline::{Automation, PipelineError};
pub use planner::{ExecutionPlanner, PlannerConfig, PlannerError};
pub use runner::{PlanRunner, RunContext, RunEvent, RunOutcome, StopSignal};
