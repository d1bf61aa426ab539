//! Mock / Scripted 推理客户端（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：取最后一条 user 消息原样回显为最终文本，便于本地跑通 REPL。
//! - ScriptedLlmClient：按 handler 名排队的预设响应（可带延迟或错误），并记录每次请求，
//!   让流水线测试完全确定。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{InferenceRequest, InferenceResponse, LlmClient, LlmError, ToolCall};
use crate::session::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
        let last_user = request
            .history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "(no input)".to_string());
        Ok(InferenceResponse::Final(format!("Echo from Mock: {last_user}")))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

struct Scripted {
    delay: Option<Duration>,
    result: Result<InferenceResponse, LlmError>,
}

/// 按 handler 排队的脚本化客户端；队列耗尽时返回 InvalidResponse
#[derive(Default)]
pub struct ScriptedLlmClient {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<InferenceRequest>>,
    next_call_id: AtomicU64,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, handler: &str, delay: Option<Duration>, result: Result<InferenceResponse, LlmError>) -> &Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(handler.to_string())
                .or_default()
                .push_back(Scripted { delay, result });
        }
        self
    }

    pub fn push_final(&self, handler: &str, text: impl Into<String>) -> &Self {
        self.push(handler, None, Ok(InferenceResponse::Final(text.into())))
    }

    /// 延迟 delay 后返回最终文本（并行/取消测试用）
    pub fn push_delayed_final(&self, handler: &str, delay: Duration, text: impl Into<String>) -> &Self {
        self.push(handler, Some(delay), Ok(InferenceResponse::Final(text.into())))
    }

    pub fn push_tool_call(&self, handler: &str, tool: &str, args: Value) -> &Self {
        let id = format!("call-{}", self.next_call_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.push_tool_calls(handler, vec![ToolCall::new(id, tool, args)])
    }

    pub fn push_tool_calls(&self, handler: &str, calls: Vec<ToolCall>) -> &Self {
        self.push(handler, None, Ok(InferenceResponse::ToolCalls(calls)))
    }

    pub fn push_error(&self, handler: &str, error: LlmError) -> &Self {
        self.push(handler, None, Err(error))
    }

    pub fn push_delayed_error(&self, handler: &str, delay: Duration, error: LlmError) -> &Self {
        self.push(handler, Some(delay), Err(error))
    }

    /// 所有已收到的请求（按到达顺序）
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_for(&self, handler: &str) -> Vec<InferenceRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.handler == handler)
            .collect()
    }

    /// 某 handler 尚未消费的脚本条数
    pub fn remaining(&self, handler: &str) -> usize {
        self.scripts
            .lock()
            .map(|s| s.get(handler).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(&request.handler).and_then(VecDeque::pop_front));
        let Some(step) = next else {
            return Err(LlmError::InvalidResponse(format!(
                "no scripted response left for handler `{}`",
                request.handler
            )));
        };
        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }
        step.result
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ContextSnapshot, Message};
    use serde_json::json;

    fn request(handler: &str, history: Vec<Message>) -> InferenceRequest {
        InferenceRequest {
            handler: handler.to_string(),
            instruction: String::new(),
            state: ContextSnapshot::default(),
            history,
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let client = MockLlmClient;
        let history = vec![Message::user("first"), Message::user("second")];
        let response = client.complete(&request("root", history)).await.unwrap();
        assert_eq!(response, InferenceResponse::Final("Echo from Mock: second".to_string()));
    }

    #[tokio::test]
    async fn test_scripted_queues_are_per_handler() {
        let client = ScriptedLlmClient::new();
        client
            .push_tool_call("a", "get_today_date", json!({}))
            .push_final("a", "done");
        client.push_final("b", "other");

        assert!(matches!(
            client.complete(&request("b", vec![])).await.unwrap(),
            InferenceResponse::Final(ref t) if t == "other"
        ));
        assert!(matches!(
            client.complete(&request("a", vec![])).await.unwrap(),
            InferenceResponse::ToolCalls(_)
        ));
        assert_eq!(client.remaining("a"), 1);
        assert_eq!(client.requests_for("a").len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_exhausted_queue_errors() {
        let client = ScriptedLlmClient::new();
        let err = client.complete(&request("nobody", vec![])).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
