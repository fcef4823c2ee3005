use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::traits::ResultSink;
use crate::types::TaskId;

/// Filesystem layout for task output:
///
/// ```text
/// <data_dir>/results/<platform>/<task_id>.json
/// <data_dir>/raw/<platform>/html/<task_id>.html
/// ```
#[derive(Debug, Clone)]
pub struct FileResultSink {
    data_dir: PathBuf,
}

impl FileResultSink {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn result_path(&self, task_id: TaskId, platform: &str) -> PathBuf {
        self.data_dir
            .join("results")
            .join(platform)
            .join(format!("{task_id}.json"))
    }

    /// Read a saved result back. `None` if the task has no result file.
    pub async fn get_result(
        &self,
        task_id: TaskId,
        platform: &str,
    ) -> Result<Option<serde_json::Value>> {
        let path = self.result_path(task_id, platform);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let value = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid result JSON in {}", path.display()))?;
        Ok(Some(value))
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[async_trait]
impl ResultSink for FileResultSink {
    async fn save_result(
        &self,
        task_id: TaskId,
        platform: &str,
        data: &serde_json::Value,
    ) -> Result<String> {
        let path = self.result_path(task_id, platform);
        ensure_parent(&path).await?;

        let body = serde_json::to_string_pretty(data).context("Failed to encode result")?;
        fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path.to_string_lossy().into_owned())
    }

    async fn save_text(&self, text: &str, path: &Path) -> Result<()> {
        ensure_parent(path).await?;
        fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn raw_html_path(&self, task_id: TaskId, platform: &str) -> PathBuf {
        self.data_dir
            .join("raw")
            .join(platform)
            .join("html")
            .join(format!("{task_id}.html"))
    }
}
