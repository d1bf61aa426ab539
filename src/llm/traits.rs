//! 推理客户端抽象
//!
//! 所有后端（OpenAI 兼容 HTTP / Mock / Scripted）实现 LlmClient：一次 complete 返回最终文本或一组工具调用。
//! 请求携带 handler 名、渲染后的指令、状态快照、完整历史与该 handler 可见的工具声明。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::{ContextSnapshot, Message};

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// 提供给模型的工具声明（名称、描述、参数 JSON Schema）
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub handler: String,
    pub instruction: String,
    pub state: ContextSnapshot,
    pub history: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResponse {
    Final(String),
    ToolCalls(Vec<ToolCall>),
}

/// 推理调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("inference request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<LlmError> },
}

/// 默认视为瞬时故障的 HTTP 状态
pub const TRANSIENT_STATUS: [u16; 4] = [429, 500, 503, 504];

impl LlmError {
    /// 是否属于瞬时故障类别（未经重试包装时冒泡为 TransientInference）
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => TRANSIENT_STATUS.contains(status),
            Self::Timeout => true,
            _ => false,
        }
    }
}

/// 推理客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError>;

    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 累计 token 使用：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
