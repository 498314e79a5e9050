use crate::engine::EngineConfig;
use crate::executor::ExecutorConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::planner::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaylineConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub planner: PlannerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub services: ServicesConfig,
    /// Where the JSON result sink writes. Results are not persisted when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSettings {
    #[serde(default = "default_min_sites")]
    pub min_sites: usize,
    #[serde(default = "default_max_sites")]
    pub max_sites: usize,
    #[serde(default = "default_max_browsers")]
    pub max_browsers: u64,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            min_sites: default_min_sites(),
            max_sites: default_max_sites(),
            max_browsers: default_max_browsers(),
        }
    }
}

fn default_min_sites() -> usize {
    3
}

fn default_max_sites() -> usize {
    4
}

fn default_max_browsers() -> u64 {
    3
}

impl PlannerSettings {
    pub fn to_planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            min_sites: self.min_sites,
            max_sites: self.max_sites.max(self.min_sites),
            max_browsers: self.max_browsers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_keystroke_delay_ms")]
    pub keystroke_delay_ms: u64,
    #[serde(default = "default_attempt_grace_ms")]
    pub attempt_grace_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_inspect_limit")]
    pub inspect_limit: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            keystroke_delay_ms: default_keystroke_delay_ms(),
            attempt_grace_ms: default_attempt_grace_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            inspect_limit: default_inspect_limit(),
        }
    }
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_keystroke_delay_ms() -> u64 {
    50
}

fn default_attempt_grace_ms() -> u64 {
    5000
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_inspect_limit() -> usize {
    50
}

impl ExecutorSettings {
    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            keystroke_delay: Duration::from_millis(self.keystroke_delay_ms),
            attempt_grace: Duration::from_millis(self.attempt_grace_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            inspect_limit: self.inspect_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_target_timeout_ms")]
    pub target_timeout_ms: u64,
    #[serde(default = "default_inter_target_delay_ms")]
    pub inter_target_delay_ms: u64,
    #[serde(default = "default_true")]
    pub skip_bot_hostile: bool,
    #[serde(default = "default_true")]
    pub early_stop: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            target_timeout_ms: default_target_timeout_ms(),
            inter_target_delay_ms: default_inter_target_delay_ms(),
            skip_bot_hostile: true,
            early_stop: true,
        }
    }
}

fn default_target_timeout_ms() -> u64 {
    120_000
}

fn default_inter_target_delay_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

impl OrchestratorSettings {
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            target_timeout: Duration::from_millis(self.target_timeout_ms),
            inter_target_delay: Duration::from_millis(self.inter_target_delay_ms),
            skip_bot_hostile: self.skip_bot_hostile,
            early_stop: self.early_stop,
        }
    }
}

/// Endpoints of the external collaborators. Unset endpoints fall back to
/// local behaviour: rule-based classification and the static site list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub classifier_url: Option<String>,
    #[serde(default)]
    pub site_selector_url: Option<String>,
    #[serde(default)]
    pub advisor_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            classifier_url: None,
            site_selector_url: None,
            advisor_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    30000
}

impl ServicesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
