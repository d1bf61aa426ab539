//! 宝宝档案 JSON 文件存储
//!
//! 文件格式 `{"profile": {...}}`；文件不存在时创建为 `{}`（表示尚无档案）。
//! 写入先落临时文件再 rename，读者不会看到写了一半的档案。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::care::{BabyProfile, ProfileStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile: Option<BabyProfile>,
}

pub struct JsonProfileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonProfileStore {
    /// 打开（必要时创建）档案文件
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, "{}").await?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn get(&self) -> Result<Option<BabyProfile>, StoreError> {
        let _guard = self.lock.lock().await;
        let raw = tokio::fs::read_to_string(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let file: ProfileFile = serde_json::from_str(&raw)?;
        Ok(file.profile)
    }

    async fn set(&self, profile: &BabyProfile) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let body = serde_json::to_string_pretty(&ProfileFile {
            profile: Some(profile.clone()),
        })?;
        write_atomic(&self.path, body.as_bytes()).await?;
        tracing::info!(path = %self.path.display(), "profile saved");
        Ok(())
    }
}

/// 先写同目录临时文件再 rename
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
