//! 流水线过程事件与 turn 作用域
//!
//! 每个执行步骤产生一个 PipelineEvent（发出者、负载、是否终止），通过 mpsc 通道推给 Runner 的调用方；
//! TurnScope 把事件通道与本 turn 的取消令牌打包，沿 handler 树向下传递（包括 agent-as-tool 的子流水线）。

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 事件负载（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// 阶段开始/跳过等说明性文本
    Text { text: String },
    ToolCall {
        id: String,
        tool: String,
        args: Value,
    },
    ToolResult {
        id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// handler 产生的最终值
    Final { value: Value },
    Error { kind: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub author: String,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub terminal: bool,
}

/// 一个 turn 的作用域：事件出口 + 取消令牌
#[derive(Debug, Clone)]
pub struct TurnScope {
    events: Option<UnboundedSender<PipelineEvent>>,
    cancel: CancellationToken,
}

impl TurnScope {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            events: None,
            cancel,
        }
    }

    pub fn with_events(mut self, tx: Option<UnboundedSender<PipelineEvent>>) -> Self {
        self.events = tx;
        self
    }

    pub fn emit(&self, author: &str, payload: EventPayload, terminal: bool) {
        if let Some(tx) = &self.events {
            let _ = tx.send(PipelineEvent {
                author: author.to_string(),
                payload,
                terminal,
            });
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

pub fn preview(value: &Value) -> String {
    let s = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if s.chars().count() > RESULT_PREVIEW_CHARS {
        format!("{}...", s.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
