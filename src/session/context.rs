//! 会话上下文：输出键 -> 值 的共享状态 + 对话历史
//!
//! 状态用 `Arc<BTreeMap>` 写时复制：snapshot() 只克隆 Arc，之后的 set() 不会影响已取出的快照。
//! 并行阶段为每个子节点 fork() 一份副本，汇合时由 commit_branches() 一次性合并所有写入。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::core::PipelineError;
use crate::session::Message;

pub type StateMap = BTreeMap<String, Value>;

/// 会话标识
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIds {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionIds {
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// 状态的不可变视图
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    state: Arc<StateMap>,
}

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }
}

/// 子分支执行完毕后待合并的内容
#[derive(Debug, Default)]
pub struct Branch {
    pub writes: Vec<(String, Value)>,
    pub history: Vec<Message>,
}

/// 单个会话的上下文（跨 turn 持久，turn 内由 Runner 独占）
#[derive(Debug, Clone)]
pub struct SessionContext {
    ids: Arc<SessionIds>,
    state: Arc<StateMap>,
    history: Vec<Message>,
}

impl SessionContext {
    pub fn new(ids: SessionIds) -> Self {
        Self {
            ids: Arc::new(ids),
            state: Arc::new(StateMap::new()),
            history: Vec::new(),
        }
    }

    /// 由已有快照与历史构造（agent-as-tool 的子流水线在此之上运行）
    pub fn from_parts(ids: Arc<SessionIds>, snapshot: ContextSnapshot, history: Vec<Message>) -> Self {
        Self {
            ids,
            state: snapshot.state,
            history,
        }
    }

    pub fn ids(&self) -> &SessionIds {
        &self.ids
    }

    pub fn shared_ids(&self) -> Arc<SessionIds> {
        Arc::clone(&self.ids)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// 覆盖写入；值在调用前已完整构造，读者要么看不到该键，要么看到完整的值
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.state).insert(key.into(), value);
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            state: Arc::clone(&self.state),
        }
    }

    pub fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn fork(&self) -> SessionContext {
        self.clone()
    }

    /// 把 fork 出去的副本收拢为 Branch：只保留 written 中的键，以及 fork_point 之后追加的历史
    pub fn into_branch(mut self, written: &[String], fork_point: usize) -> Branch {
        let mut keys = HashSet::new();
        let writes = written
            .iter()
            .filter(|k| keys.insert(k.as_str()))
            .filter_map(|k| self.state.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        let history = if fork_point <= self.history.len() {
            self.history.split_off(fork_point)
        } else {
            Vec::new()
        };
        Branch { writes, history }
    }

    /// 合并多个分支：先检查键是否互斥，全部通过后才写入，保证要么全部可见要么都不可见
    pub fn commit_branches(&mut self, branches: Vec<Branch>) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for branch in &branches {
            for (key, _) in &branch.writes {
                if !seen.insert(key.as_str()) {
                    return Err(PipelineError::SessionInvariantViolation(format!(
                        "output key `{key}` written by more than one parallel branch"
                    )));
                }
            }
        }
        for branch in branches {
            for (key, value) in branch.writes {
                self.set(key, value);
            }
            self.history.extend(branch.history);
        }
        Ok(())
    }
}
