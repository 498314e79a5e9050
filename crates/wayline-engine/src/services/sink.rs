use super::{ResultSink, ServiceError};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;
use wayline_common::AutomationResult;

/// Writes each result to `<dir>/<id>.json`.
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, result: &AutomationResult) -> PathBuf {
        self.dir.join(format!("{}.json", result.id))
    }
}

#[async_trait]
impl ResultSink for JsonDirSink {
    async fn store(&self, result: &AutomationResult) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        let path = self.path_for(result);
        tokio::fs::write(&path, json).await?;
        info!("Saved result to {}", path.display());
        Ok(())
    }
}
