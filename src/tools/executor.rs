//! 工具调用代理（Broker）
//!
//! invoke() 依次：按名查找 -> 参数 schema 校验（不通过则不调用工具）-> 超时内执行（捕获 panic）
//! -> 输出结构化审计日志（JSON）-> 成功时把结果作为 tool-result 消息追加到会话历史。
//! 工具自身的失败一律转为 PipelineError，不会让协作方的异常逃出。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;

use crate::core::PipelineError;
use crate::llm::{ToolCall, ToolDeclaration};
use crate::pipeline::TurnScope;
use crate::session::{Message, SessionContext};
use crate::tools::{ToolContext, ToolError, ToolRegistry};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具调用代理：对每次调用施加校验与超时，并将结果映射为 PipelineError
#[derive(Clone)]
pub struct ToolBroker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolBroker {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry.declarations()
    }

    /// 执行一次工具调用；handler 为发起调用的 leaf 名（写入 tool-result 消息的 author）
    pub async fn invoke(
        &self,
        call: &ToolCall,
        ctx: &mut SessionContext,
        scope: &TurnScope,
        handler: &str,
    ) -> Result<Value, PipelineError> {
        let start = Instant::now();
        let preview = args_preview(&call.args);

        let Some(tool) = self.registry.get(&call.name) else {
            audit(&call.name, "invalid", start, &preview);
            return Err(PipelineError::ToolValidation {
                tool: call.name.clone(),
                reason: format!(
                    "unknown tool; available tools: {}",
                    self.registry.tool_names().join(", ")
                ),
            });
        };

        if let Err(reason) = self.registry.validate_args(&call.name, &call.args) {
            audit(&call.name, "invalid", start, &preview);
            return Err(PipelineError::ToolValidation {
                tool: call.name.clone(),
                reason,
            });
        }

        let tool_ctx = ToolContext {
            handler: handler.to_string(),
            ids: ctx.shared_ids(),
            state: ctx.snapshot(),
            history: ctx.history().to_vec(),
            scope: scope.clone(),
        };
        let run = AssertUnwindSafe(tool.execute(call.args.clone(), &tool_ctx)).catch_unwind();
        let bounded = tool.bounded_by_call_timeout();
        let timed = async {
            if bounded {
                tokio::time::timeout(self.timeout, run).await
            } else {
                Ok(run.await)
            }
        };

        let result = tokio::select! {
            biased;
            _ = scope.cancelled() => {
                tracing::debug!(tool = %call.name, "tool call cancelled");
                return Err(PipelineError::Cancelled);
            }
            r = timed => r,
        };

        let value = match result {
            Ok(Ok(Ok(value))) => {
                audit(&call.name, "ok", start, &preview);
                value
            }
            Ok(Ok(Err(ToolError::InvalidArguments(reason)))) => {
                audit(&call.name, "invalid", start, &preview);
                return Err(PipelineError::ToolValidation {
                    tool: call.name.clone(),
                    reason,
                });
            }
            Ok(Ok(Err(ToolError::Execution(reason)))) => {
                audit(&call.name, "error", start, &preview);
                return Err(PipelineError::ToolExecution {
                    tool: call.name.clone(),
                    reason,
                });
            }
            Ok(Ok(Err(ToolError::Cancelled))) => return Err(PipelineError::Cancelled),
            Ok(Err(_panic)) => {
                audit(&call.name, "panic", start, &preview);
                return Err(PipelineError::ToolExecution {
                    tool: call.name.clone(),
                    reason: "tool panicked".to_string(),
                });
            }
            Err(_elapsed) => {
                audit(&call.name, "timeout", start, &preview);
                return Err(PipelineError::ToolExecution {
                    tool: call.name.clone(),
                    reason: format!("timed out after {}s", self.timeout.as_secs_f64()),
                });
            }
        };

        ctx.append(Message::tool_result(handler, &call.id, &call.name, value.clone()));
        Ok(value)
    }
}

fn audit(tool: &str, outcome: &str, start: Instant, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
