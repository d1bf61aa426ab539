//! 会话监管：每个进行中的 turn 一个取消令牌
//!
//! begin_turn 返回 TurnGuard，guard 释放时（正常返回、出错、被取消）自动注销；
//! cancel(session_id) 只取消该会话的当前 turn，cancel_all 用于进程关闭。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

type ActiveTurns = Mutex<HashMap<String, CancellationToken>>;

/// 会话级生命周期管理：根令牌 + 按会话登记的 turn 令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    root: CancellationToken,
    active: Arc<ActiveTurns>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 登记一个 turn；返回的 guard 持有该 turn 的令牌
    pub fn begin_turn(&self, session_id: &str) -> TurnGuard {
        let token = self.root.child_token();
        lock(&self.active).insert(session_id.to_string(), token.clone());
        TurnGuard {
            session_id: session_id.to_string(),
            token,
            active: Arc::clone(&self.active),
        }
    }

    /// 取消指定会话正在进行的 turn；没有进行中的 turn 时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        let token = lock(&self.active).get(session_id).cloned();
        match token {
            Some(t) => {
                t.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消所有进行中的 turn（进程关闭）
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn active_turns(&self) -> usize {
        lock(&self.active).len()
    }
}

/// 持锁线程 panic 不影响登记表本身，毒化后照常使用
fn lock(active: &ActiveTurns) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个 turn 的登记凭证
#[derive(Debug)]
pub struct TurnGuard {
    session_id: String,
    token: CancellationToken,
    active: Arc<ActiveTurns>,
}

impl TurnGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.session_id);
    }
}
