//! Turn Runner：一条用户消息进、一条回复出
//!
//! 取得会话独占租约 -> 登记 turn 取消令牌 -> 追加用户消息 -> 运行根 handler（事件实时推给调用方）
//! -> 根节点成功时取其指定输出作为回复，失败时返回通用致歉文本。
//! 租约与取消登记均为 RAII，正常返回、出错、被取消、future 被 drop 时都会释放。

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::{PipelineError, SessionSupervisor};
use crate::pipeline::{EventPayload, HandlerSpec, PipelineEvent, TurnScope};
use crate::session::{InMemorySessionService, Message};

/// 失败时展示给用户的回复（不暴露内部错误细节）
pub const APOLOGY_TEXT: &str =
    "Sorry, something went wrong while handling that. Please try again in a moment.";
pub const CANCELLED_TEXT: &str = "That request was cancelled.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Failed { reason: String },
    Cancelled,
}

/// 一个 turn 的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    /// 展示给用户的文本
    pub text: String,
    /// 根 handler 的指定输出值
    pub value: Option<Value>,
    pub status: TurnStatus,
}

pub struct TurnRunner {
    root: Arc<HandlerSpec>,
    sessions: Arc<InMemorySessionService>,
    supervisor: SessionSupervisor,
}

impl TurnRunner {
    pub fn new(
        root: Arc<HandlerSpec>,
        sessions: Arc<InMemorySessionService>,
        supervisor: SessionSupervisor,
    ) -> Self {
        Self {
            root,
            sessions,
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn sessions(&self) -> &Arc<InMemorySessionService> {
        &self.sessions
    }

    /// 取消指定会话正在进行的 turn
    pub fn cancel(&self, session_id: &str) -> bool {
        self.supervisor.cancel(session_id)
    }

    /// 运行一个 turn。会话不存在或已有 turn 在跑时返回 Err；
    /// 流水线自身的失败不作为 Err，而是体现在 TurnReply.status 中
    pub async fn run_turn(
        &self,
        session_id: &str,
        user_text: &str,
        events: Option<UnboundedSender<PipelineEvent>>,
    ) -> Result<TurnReply, PipelineError> {
        let mut lease = self.sessions.acquire(session_id).await?;
        let guard = self.supervisor.begin_turn(session_id);
        let scope = TurnScope::new(guard.token()).with_events(events);

        lease.append(Message::user(user_text));
        tracing::info!(session = %session_id, root = %self.root.name(), "turn started");

        let result = self.root.run(&mut lease, &scope).await;
        let reply = match result {
            Ok(outcome) => {
                if !outcome.failures.is_empty() {
                    tracing::warn!(
                        session = %session_id,
                        failures = outcome.failures.len(),
                        "turn completed with recorded failures"
                    );
                }
                let text = outcome.output.as_ref().map(reply_text).unwrap_or_default();
                TurnReply {
                    text,
                    value: outcome.output,
                    status: TurnStatus::Completed,
                }
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(session = %session_id, "turn cancelled");
                TurnReply {
                    text: CANCELLED_TEXT.to_string(),
                    value: None,
                    status: TurnStatus::Cancelled,
                }
            }
            Err(e) => {
                tracing::error!(session = %session_id, kind = e.kind(), error = %e, "turn failed");
                scope.emit(
                    self.root.name(),
                    EventPayload::Error {
                        kind: e.kind().to_string(),
                        text: APOLOGY_TEXT.to_string(),
                    },
                    true,
                );
                TurnReply {
                    text: APOLOGY_TEXT.to_string(),
                    value: None,
                    status: TurnStatus::Failed {
                        reason: e.to_string(),
                    },
                }
            }
        };
        tracing::info!(session = %session_id, status = ?reply.status, "turn finished");
        Ok(reply)
    }
}

/// 回复文本：字符串原样；带 message 字段的对象取该字段；其他值序列化为 JSON
fn reply_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(m)) => m.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}
