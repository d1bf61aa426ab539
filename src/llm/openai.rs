//! OpenAI 兼容推理客户端
//!
//! 直接用 reqwest 调 `{base_url}/chat/completions`，原生 function calling；
//! 非 2xx 状态码原样映射为 LlmError::Status，交给重试策略分类（默认端点为 Gemini 的 OpenAI 兼容接口）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{InferenceRequest, InferenceResponse, LlmClient, LlmError, ToolCall};
use crate::session::{Message, Part, Role};

/// 错误响应体保留的最大字符数
const ERROR_BODY_PREVIEW_CHARS: usize = 500;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    pub usage: TokenUsage,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            usage: TokenUsage::new(),
        })
    }

    fn request_body(&self, request: &InferenceRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire_messages(request),
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

/// 把会话历史转成 chat 消息：本 handler 的发言与工具往返保持原角色，
/// 其他 handler 的内容改写为 user 角色的 "For context:" 旁白
fn to_wire_messages(request: &InferenceRequest) -> Vec<Value> {
    let mut out = vec![json!({"role": "system", "content": request.instruction})];
    for msg in &request.history {
        let own = msg.is_from(&request.handler);
        match msg.role {
            Role::User => out.push(json!({"role": "user", "content": msg.text()})),
            Role::Agent if own => out.push(own_agent_message(msg)),
            Role::ToolResult if own => {
                for part in &msg.parts {
                    if let Part::ToolResult { id, result, .. } = part {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": id,
                            "content": render_result(result),
                        }));
                    }
                }
            }
            Role::Agent | Role::ToolResult => {
                if let Some(text) = narrate(msg) {
                    out.push(json!({"role": "user", "content": text}));
                }
            }
        }
    }
    out
}

fn own_agent_message(msg: &Message) -> Value {
    let calls: Vec<Value> = msg
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::ToolCall { id, name, args } => Some(json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": args.to_string()},
            })),
            _ => None,
        })
        .collect();
    let mut wire = json!({"role": "assistant", "content": msg.text()});
    if !calls.is_empty() {
        wire["tool_calls"] = Value::Array(calls);
    }
    wire
}

fn narrate(msg: &Message) -> Option<String> {
    let author = msg.author.as_deref().unwrap_or("agent");
    let lines: Vec<String> = msg
        .parts
        .iter()
        .map(|p| match p {
            Part::Text { text } => format!("[{author}] said: {text}"),
            Part::Data { data } => format!("[{author}] said: {data}"),
            Part::ToolCall { name, args, .. } => {
                format!("[{author}] called tool `{name}` with parameters: {args}")
            }
            Part::ToolResult { name, result, .. } => {
                format!("[{author}] `{name}` tool returned result: {}", render_result(result))
            }
        })
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(format!("For context:\n{}", lines.join("\n")))
    }
}

fn render_result(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_choice(message: ChoiceMessage) -> Result<InferenceResponse, LlmError> {
    let wire_calls = message.tool_calls.unwrap_or_default();
    if wire_calls.is_empty() {
        return Ok(InferenceResponse::Final(message.content.unwrap_or_default()));
    }
    let calls = wire_calls
        .into_iter()
        .map(|c| {
            let args = if c.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&c.function.arguments).map_err(|e| {
                    LlmError::InvalidResponse(format!(
                        "arguments for `{}` are not valid JSON: {e}",
                        c.function.name
                    ))
                })?
            };
            let id = if c.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                c.id
            };
            Ok(ToolCall::new(id, c.function.name, args))
        })
        .collect::<Result<Vec<_>, LlmError>>()?;
    Ok(InferenceResponse::ToolCalls(calls))
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::InvalidResponse(e.to_string())
            }
        })?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;
        parse_choice(choice.message)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

fn map_transport(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}
