use super::schema::WaylineConfig;
use crate::engine::EngineKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Explicit config file, checked before the search path.
pub const CONFIG_ENV: &str = "WAYLINE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. `$WAYLINE_CONFIG`
    /// 2. ./wayline.yaml or ./wayline.yml
    /// 3. `<config dir>/wayline/config.yaml`
    /// 4. ~/.wayline/config.yaml
    /// 5. Default configuration
    pub async fn load_default() -> Result<WaylineConfig, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path)).await;
        }
        Self::load_first(&Self::search_paths()).await
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./wayline.yaml"), PathBuf::from("./wayline.yml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("wayline").join("config.yaml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".wayline").join("config.yaml"));
        }
        paths
    }

    /// Loads the first of `paths` that exists, or the defaults.
    pub async fn load_first(paths: &[PathBuf]) -> Result<WaylineConfig, ConfigError> {
        match paths.iter().find(|p| p.exists()) {
            Some(path) => Self::load_from(path).await,
            None => {
                debug!("No config file found; using defaults");
                Ok(WaylineConfig::default())
            }
        }
    }

    pub async fn load_from(path: &Path) -> Result<WaylineConfig, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let config: WaylineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Applies `WAYLINE_*` environment overrides on top of a loaded file.
    pub fn apply_env(config: &mut WaylineConfig) -> Result<(), ConfigError> {
        Self::apply_env_with(config, |var| std::env::var(var).ok())
    }

    pub fn apply_env_with(
        config: &mut WaylineConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("WAYLINE_ENGINE") {
            let kind = value.parse::<EngineKind>().map_err(|_| ConfigError::Env {
                var: "WAYLINE_ENGINE",
                value: value.clone(),
            })?;
            config.engine.kind = Some(kind);
        }
        if let Some(value) = get("WAYLINE_HEADLESS") {
            config.engine.headless = parse_flag(&value).ok_or(ConfigError::Env {
                var: "WAYLINE_HEADLESS",
                value,
            })?;
        }
        if let Some(value) = get("WAYLINE_TIMEOUT_MS") {
            config.engine.timeout_ms = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "WAYLINE_TIMEOUT_MS",
                value: value.clone(),
            })?;
        }
        if let Some(value) = get("WAYLINE_BRIDGE_COMMAND") {
            config.engine.bridge_command = value.split_whitespace().map(str::to_string).collect();
        }
        if let Some(value) = get("WAYLINE_CLASSIFIER_URL") {
            config.services.classifier_url = Some(value);
        }
        if let Some(value) = get("WAYLINE_SITE_SELECTOR_URL") {
            config.services.site_selector_url = Some(value);
        }
        if let Some(value) = get("WAYLINE_ADVISOR_URL") {
            config.services.advisor_url = Some(value);
        }
        if let Some(value) = get("WAYLINE_OUTPUT_DIR") {
            config.output_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
