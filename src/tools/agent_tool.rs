//! Agent-as-tool：把一整棵 HandlerSpec 包装成工具
//!
//! 参数 `{"request": "..."}`；在调用方上下文的 fork 上运行子流水线（状态快照，历史可选），
//! request 作为 user 消息追加；共享本 turn 的事件通道与取消令牌。返回子流水线的指定输出值，
//! 子流水线的状态写入只留在 fork 中。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::pipeline::HandlerSpec;
use crate::session::{Message, SessionContext};
use crate::tools::{Tool, ToolContext, ToolError};

pub struct AgentTool {
    spec: Arc<HandlerSpec>,
    description: String,
    include_history: bool,
}

impl AgentTool {
    pub fn new(spec: Arc<HandlerSpec>, description: impl Into<String>) -> Self {
        Self {
            spec,
            description: description.into(),
            include_history: false,
        }
    }

    /// 子流水线能看到调用方的完整对话历史
    pub fn with_history(mut self) -> Self {
        self.include_history = true;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        self.spec.name()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "What the specialist should do, in plain language"
                }
            },
            "required": ["request"]
        })
    }

    fn bounded_by_call_timeout(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let request = args
            .get("request")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("`request` must be a non-empty string".to_string()))?;

        let history = if self.include_history {
            ctx.history.clone()
        } else {
            Vec::new()
        };
        let mut fork = SessionContext::from_parts(ctx.ids.clone(), ctx.state.clone(), history);
        fork.append(Message::user(request));

        tracing::info!(caller = %ctx.handler, agent = %self.spec.name(), "delegating to sub-pipeline");
        match self.spec.run(&mut fork, &ctx.scope).await {
            Ok(outcome) => Ok(outcome.output.unwrap_or(Value::Null)),
            Err(e) if e.is_cancelled() => Err(ToolError::Cancelled),
            Err(e) => Err(ToolError::Execution(e.to_string())),
        }
    }
}
