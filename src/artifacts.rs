//! 内存版本化制品服务
//!
//! 二进制产物（如图表图片）按 (app, user, session, 文件名) 存放，每次 save 追加一个新版本（从 0 开始），
//! 对话中只传递文件名与版本号，不内联字节。

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::session::SessionIds;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact `{name}` not found")]
    NotFound { name: String },

    #[error("artifact `{name}` has no version {version}")]
    VersionNotFound { name: String, version: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub mime_type: String,
    pub data: Vec<u8>,
}

type ArtifactKey = (String, String, String, String);

#[derive(Default)]
pub struct InMemoryArtifactService {
    store: RwLock<HashMap<ArtifactKey, Vec<Artifact>>>,
}

fn key(ids: &SessionIds, name: &str) -> ArtifactKey {
    (
        ids.app_name.clone(),
        ids.user_id.clone(),
        ids.session_id.clone(),
        name.to_string(),
    )
}

impl InMemoryArtifactService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存新版本，返回版本号
    pub async fn save(&self, ids: &SessionIds, name: &str, artifact: Artifact) -> u32 {
        let mut store = self.store.write().await;
        let versions = store.entry(key(ids, name)).or_default();
        versions.push(artifact);
        let version = (versions.len() - 1) as u32;
        tracing::info!(artifact = %name, version, session = %ids.session_id, "artifact saved");
        version
    }

    /// 读取指定版本；version 为 None 时取最新版本
    pub async fn load(
        &self,
        ids: &SessionIds,
        name: &str,
        version: Option<u32>,
    ) -> Result<Artifact, ArtifactError> {
        let store = self.store.read().await;
        let versions = store
            .get(&key(ids, name))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ArtifactError::NotFound {
                name: name.to_string(),
            })?;
        let found = match version {
            Some(v) => versions.get(v as usize),
            None => versions.last(),
        };
        found.cloned().ok_or_else(|| ArtifactError::VersionNotFound {
            name: name.to_string(),
            version: version.unwrap_or_default(),
        })
    }

    pub async fn list_versions(&self, ids: &SessionIds, name: &str) -> Vec<u32> {
        let store = self.store.read().await;
        store
            .get(&key(ids, name))
            .map(|v| (0..v.len() as u32).collect())
            .unwrap_or_default()
    }

    /// 当前会话下的所有制品名
    pub async fn list_names(&self, ids: &SessionIds) -> Vec<String> {
        let store = self.store.read().await;
        let mut names: Vec<String> = store
            .keys()
            .filter(|(app, user, session, _)| {
                app == &ids.app_name && user == &ids.user_id && session == &ids.session_id
            })
            .map(|(_, _, _, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}
