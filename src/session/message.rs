//! 会话消息：user / agent / tool-result 三种角色，内容为有序 Part 列表
//!
//! 只追加、不修改；agent 与 tool-result 消息带 author（产生它的 handler 名），
//! 推理客户端据此区分「自己的」工具调用与其他 handler 的发言。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolCall;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Agent,
    ToolResult,
}

/// 消息内容片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Data {
        data: Value,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        name: String,
        result: Value,
        is_error: bool,
    },
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub parts: Vec<Part>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, author: Option<String>, parts: Vec<Part>) -> Self {
        Self {
            role,
            author,
            parts,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, None, vec![Part::Text { text: text.into() }])
    }

    pub fn agent(author: &str, text: impl Into<String>) -> Self {
        Self::new(
            Role::Agent,
            Some(author.to_string()),
            vec![Part::Text { text: text.into() }],
        )
    }

    /// handler 发出的一批工具调用请求
    pub fn agent_tool_calls(author: &str, calls: &[ToolCall]) -> Self {
        let parts = calls
            .iter()
            .map(|c| Part::ToolCall {
                id: c.id.clone(),
                name: c.name.clone(),
                args: c.args.clone(),
            })
            .collect();
        Self::new(Role::Agent, Some(author.to_string()), parts)
    }

    pub fn tool_result(author: &str, call_id: &str, tool: &str, result: Value) -> Self {
        Self::new(
            Role::ToolResult,
            Some(author.to_string()),
            vec![Part::ToolResult {
                id: call_id.to_string(),
                name: tool.to_string(),
                result,
                is_error: false,
            }],
        )
    }

    /// 回灌给模型的工具错误（参数不合法、协议违规、可恢复的执行失败）
    pub fn tool_error(author: &str, call_id: &str, tool: &str, detail: impl Into<String>) -> Self {
        Self::new(
            Role::ToolResult,
            Some(author.to_string()),
            vec![Part::ToolResult {
                id: call_id.to_string(),
                name: tool.to_string(),
                result: Value::String(detail.into()),
                is_error: true,
            }],
        )
    }

    /// 拼接所有文本片段
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_from(&self, author: &str) -> bool {
        self.author.as_deref() == Some(author)
    }
}
