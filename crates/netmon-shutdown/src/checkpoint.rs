use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 状态检查点文件
///
/// 写入先落到同目录的临时文件再重命名，读者不会看到写了一半的文件。
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub async fn save<T: Serialize>(&self, state: &T) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, json).await?;
        fs::rename(&temp, &self.path).await?;

        debug!(path = ?self.path, "Checkpoint saved");
        Ok(())
    }

    /// 读取检查点；文件不存在时返回 None
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, CheckpointError> {
        let json = match fs::read(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&json)?;
        info!(path = ?self.path, "Checkpoint loaded");
        Ok(Some(state))
    }
}
