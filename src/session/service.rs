//! 内存会话服务
//!
//! 每个会话一把 `tokio::sync::Mutex`：acquire() 用 try_lock_owned 取得独占租约，
//! 同一会话已有 turn 在跑时立即返回 SessionBusy（单写者），不同会话互不影响。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::PipelineError;
use crate::session::{SessionContext, SessionIds};

/// 会话租约：持有期间独占该会话上下文，drop 即释放
pub type SessionLease = OwnedMutexGuard<SessionContext>;

#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionContext>>>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建会话；已存在时保持原状并返回 false
    pub async fn create_session(&self, ids: SessionIds) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&ids.session_id) {
            return false;
        }
        tracing::info!(session = %ids.session_id, user = %ids.user_id, "session created");
        let id = ids.session_id.clone();
        sessions.insert(id, Arc::new(Mutex::new(SessionContext::new(ids))));
        true
    }

    /// 取得会话独占租约；会话不存在返回 SessionNotFound，正被占用返回 SessionBusy
    pub async fn acquire(&self, session_id: &str) -> Result<SessionLease, PipelineError> {
        let slot = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
        slot.try_lock_owned()
            .map_err(|_| PipelineError::SessionBusy(session_id.to_string()))
    }

    /// 等待会话空闲后在其上下文上执行只读闭包（测试与诊断用）
    pub async fn inspect<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&SessionContext) -> R,
    ) -> Result<R, PipelineError> {
        let slot = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
        let guard = slot.lock().await;
        Ok(f(&guard))
    }
}
