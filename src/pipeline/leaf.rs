//! Leaf handler：一次「推理 -> 工具调用 -> 推理 ...」循环，产出一个写入会话上下文的结果
//!
//! 状态机：AwaitingModel -> (ToolRequested -> AwaitingToolResult -> AwaitingModel)* -> Final | Failed。
//! - 推理经由注入的 LlmClient（通常已套上 RetryingLlmClient）；
//! - 工具调用经由 ToolBroker；可恢复的工具错误按 RecoveryEngine 回灌给模型；
//! - 最终值先按输出契约校验，通过后才写入输出键（失败时不写）。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::PipelineSettings;
use crate::core::{PipelineError, RecoveryAction, RecoveryEngine};
use crate::llm::{InferenceRequest, InferenceResponse, LlmClient, LlmError, ToolCall};
use crate::pipeline::events::preview;
use crate::pipeline::{EventPayload, HandlerOutcome, TurnScope};
use crate::session::{ContextSnapshot, Message, SessionContext};
use crate::tools::schema::{compile_schema, extract_json_block, validate_with};
use crate::tools::{Tool, ToolBroker, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafState {
    AwaitingModel,
    ToolRequested,
    AwaitingToolResult,
    Final,
    Failed,
}

impl LeafState {
    /// 状态机允许的迁移；Final / Failed 为终态
    pub fn can_advance_to(self, to: LeafState) -> bool {
        use LeafState::*;
        matches!(
            (self, to),
            (AwaitingModel, ToolRequested | Final | Failed)
                | (ToolRequested, AwaitingToolResult | AwaitingModel | Failed)
                | (AwaitingToolResult, AwaitingToolResult | AwaitingModel | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LeafState::Final | LeafState::Failed)
    }
}

/// 最终值的形状约定
#[derive(Debug, Clone)]
pub enum OutputContract {
    /// 任意文本，按字符串存储
    Text,
    /// 文本须解析为 JSON 且满足 schema
    Json(Value),
}

/// 违反 tool_at_most_once 时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViolationPolicy {
    /// 作为工具错误回灌给模型，handler 继续
    #[default]
    Report,
    /// handler 直接失败
    Fail,
}

/// build() 时编译好的输出契约
enum CompiledContract {
    Text,
    Json(jsonschema::Validator),
}

#[derive(Debug, Clone)]
struct EmptyGuard {
    key: String,
    fallback: Value,
}

pub struct LeafHandler {
    name: String,
    instruction: String,
    llm: Arc<dyn LlmClient>,
    broker: ToolBroker,
    output_key: Option<String>,
    contract: CompiledContract,
    at_most_once: HashSet<String>,
    violation_policy: ViolationPolicy,
    skip_when_empty: Option<EmptyGuard>,
    max_steps: usize,
    recovery: RecoveryEngine,
}

impl LeafHandler {
    pub fn builder(name: impl Into<String>) -> LeafBuilder {
        LeafBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub async fn run(
        &self,
        ctx: &mut SessionContext,
        scope: &TurnScope,
    ) -> Result<HandlerOutcome, PipelineError> {
        let mut state = LeafState::AwaitingModel;
        let result = self.drive(ctx, scope, &mut state).await;
        if let Err(e) = &result {
            if !e.is_cancelled() && !state.is_terminal() {
                self.transition(&mut state, LeafState::Failed);
                tracing::warn!(handler = %self.name, kind = e.kind(), error = %e, "handler failed");
                scope.emit(
                    &self.name,
                    EventPayload::Error {
                        kind: e.kind().to_string(),
                        text: e.to_string(),
                    },
                    true,
                );
            }
        }
        result
    }

    async fn drive(
        &self,
        ctx: &mut SessionContext,
        scope: &TurnScope,
        state: &mut LeafState,
    ) -> Result<HandlerOutcome, PipelineError> {
        if scope.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if let Some(guard) = &self.skip_when_empty {
            if is_empty_input(ctx.get(&guard.key)) {
                tracing::info!(handler = %self.name, key = %guard.key, "input empty, writing fallback");
                scope.emit(
                    &self.name,
                    EventPayload::Text {
                        text: format!("`{}` is empty, skipping inference", guard.key),
                    },
                    false,
                );
                return Ok(self.finish(ctx, scope, state, guard.fallback.clone()));
            }
        }

        let instruction = render_instruction(&self.name, &self.instruction, &ctx.snapshot())?;
        let tools = self.broker.declarations();
        let mut call_counts: HashMap<String, usize> = HashMap::new();

        for step in 1..=self.max_steps {
            tracing::debug!(handler = %self.name, step, max_steps = self.max_steps, "inference");

            let request = InferenceRequest {
                handler: self.name.clone(),
                instruction: instruction.clone(),
                state: ctx.snapshot(),
                history: ctx.history().to_vec(),
                tools: tools.clone(),
            };
            let response = tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(PipelineError::Cancelled),
                r = self.llm.complete(&request) => r.map_err(|e| self.inference_error(e))?,
            };

            match response {
                InferenceResponse::ToolCalls(calls) if !calls.is_empty() => {
                    self.transition(state, LeafState::ToolRequested);
                    ctx.append(Message::agent_tool_calls(&self.name, &calls));
                    for (i, call) in calls.iter().enumerate() {
                        if let Err(e) = self.dispatch(call, ctx, scope, state, &mut call_counts).await {
                            self.close_unanswered(ctx, &calls[i..], &e);
                            return Err(e);
                        }
                    }
                    self.transition(state, LeafState::AwaitingModel);
                }
                InferenceResponse::ToolCalls(_) => {
                    return Err(PipelineError::MalformedOutput {
                        handler: self.name.clone(),
                        detail: "empty tool call list".to_string(),
                    });
                }
                InferenceResponse::Final(text) => {
                    let value = self.check_contract(&text)?;
                    ctx.append(Message::agent(&self.name, text));
                    return Ok(self.finish(ctx, scope, state, value));
                }
            }
        }

        Err(PipelineError::ProtocolViolation {
            handler: self.name.clone(),
            detail: format!("no final answer within {} inference steps", self.max_steps),
        })
    }

    /// 执行单个工具调用，失败时交给 RecoveryEngine 决定回灌还是中止
    async fn dispatch(
        &self,
        call: &ToolCall,
        ctx: &mut SessionContext,
        scope: &TurnScope,
        state: &mut LeafState,
        call_counts: &mut HashMap<String, usize>,
    ) -> Result<(), PipelineError> {
        scope.emit(
            &self.name,
            EventPayload::ToolCall {
                id: call.id.clone(),
                tool: call.name.clone(),
                args: call.args.clone(),
            },
            false,
        );

        // 被 schema 拒绝的调用没有真正执行，不计入次数
        let executed = call_counts.get(&call.name).copied().unwrap_or(0);
        let result = if self.at_most_once.contains(&call.name) && executed >= 1 {
            Err(PipelineError::ProtocolViolation {
                handler: self.name.clone(),
                detail: format!("`{}` may be called at most once per run", call.name),
            })
        } else {
            self.transition(state, LeafState::AwaitingToolResult);
            let r = self.broker.invoke(call, ctx, scope, &self.name).await;
            if !matches!(r, Err(PipelineError::ToolValidation { .. })) {
                *call_counts.entry(call.name.clone()).or_insert(0) += 1;
            }
            r
        };

        let err = match result {
            Ok(value) => {
                scope.emit(
                    &self.name,
                    EventPayload::ToolResult {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        ok: true,
                        preview: preview(&value),
                    },
                    false,
                );
                return Ok(());
            }
            Err(e) => e,
        };

        if err.is_cancelled() {
            return Err(err);
        }
        if matches!(err, PipelineError::ProtocolViolation { .. })
            && self.violation_policy == ViolationPolicy::Fail
        {
            return Err(err);
        }
        match self.recovery.handle(&err) {
            RecoveryAction::ReportToModel(text) => {
                tracing::warn!(handler = %self.name, tool = %call.name, error = %err, "tool error reported back to model");
                scope.emit(
                    &self.name,
                    EventPayload::ToolResult {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        ok: false,
                        preview: text.clone(),
                    },
                    false,
                );
                ctx.append(Message::tool_error(&self.name, &call.id, &call.name, text));
                Ok(())
            }
            RecoveryAction::Abort => Err(err),
        }
    }

    /// 中止时给本批中尚未得到结果的调用补上错误结果，
    /// 保证历史里每个 tool call id 都有对应的 tool-result（后续 turn 的请求才合法）
    fn close_unanswered(&self, ctx: &mut SessionContext, pending: &[ToolCall], err: &PipelineError) {
        for (i, call) in pending.iter().enumerate() {
            let detail = if i == 0 {
                format!("The call did not complete: {err}")
            } else {
                "The call was not executed because an earlier call in the same batch failed."
                    .to_string()
            };
            ctx.append(Message::tool_error(&self.name, &call.id, &call.name, detail));
        }
    }

    fn finish(
        &self,
        ctx: &mut SessionContext,
        scope: &TurnScope,
        state: &mut LeafState,
        value: Value,
    ) -> HandlerOutcome {
        let mut written = Vec::new();
        if let Some(key) = &self.output_key {
            ctx.set(key.clone(), value.clone());
            written.push(key.clone());
        }
        self.transition(state, LeafState::Final);
        scope.emit(&self.name, EventPayload::Final { value: value.clone() }, true);
        HandlerOutcome {
            handler: self.name.clone(),
            written,
            output: Some(value),
            failures: Vec::new(),
        }
    }

    fn check_contract(&self, text: &str) -> Result<Value, PipelineError> {
        match &self.contract {
            CompiledContract::Text => Ok(Value::String(text.to_string())),
            CompiledContract::Json(validator) => {
                let value: Value = serde_json::from_str(extract_json_block(text)).map_err(|e| {
                    PipelineError::MalformedOutput {
                        handler: self.name.clone(),
                        detail: format!("final answer is not JSON: {e}"),
                    }
                })?;
                validate_with(validator, &value).map_err(|detail| {
                    PipelineError::MalformedOutput {
                        handler: self.name.clone(),
                        detail,
                    }
                })?;
                Ok(value)
            }
        }
    }

    fn inference_error(&self, e: LlmError) -> PipelineError {
        let handler = self.name.clone();
        match e {
            LlmError::Exhausted { .. } => PipelineError::TerminalInference { handler, source: e },
            e if e.is_transient() => PipelineError::TransientInference { handler, source: e },
            e => PipelineError::TerminalInference { handler, source: e },
        }
    }

    fn transition(&self, state: &mut LeafState, to: LeafState) {
        if !state.can_advance_to(to) {
            tracing::warn!(handler = %self.name, from = ?*state, to = ?to, "unexpected leaf transition");
        }
        tracing::debug!(handler = %self.name, from = ?*state, to = ?to, "leaf transition");
        *state = to;
    }
}

/// 状态键为空：不存在、null、空数组、空对象或空白字符串
fn is_empty_input(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.is_empty() || s == "[]"
        }
        Some(_) => false,
    }
}

/// 渲染指令模板：`{key}` 必须存在于状态中，`{key?}` 缺失时渲染为空；
/// 字符串原样插入，其他值插入 JSON。不符合占位符语法的花括号原样保留。
pub fn render_instruction(
    handler: &str,
    template: &str,
    state: &ContextSnapshot,
) -> Result<String, PipelineError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let placeholder = after.find('}').map(|close| (&after[..close], close));
        match placeholder {
            Some((inner, close)) if is_placeholder(inner) => {
                let (key, optional) = match inner.strip_suffix('?') {
                    Some(k) => (k, true),
                    None => (inner, false),
                };
                match state.get(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(v) => out.push_str(&v.to_string()),
                    None if optional => {}
                    None => {
                        return Err(PipelineError::Configuration(format!(
                            "instruction of `{handler}` references missing state key `{key}`"
                        )))
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder(inner: &str) -> bool {
    let key = inner.strip_suffix('?').unwrap_or(inner);
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Leaf 构建器：build() 时校验配置
pub struct LeafBuilder {
    name: String,
    instruction: Option<String>,
    llm: Option<Arc<dyn LlmClient>>,
    tools: Vec<Arc<dyn Tool>>,
    output_key: Option<String>,
    contract: OutputContract,
    at_most_once: Vec<String>,
    violation_policy: ViolationPolicy,
    skip_when_empty: Option<EmptyGuard>,
    max_steps: usize,
    tool_timeout: Duration,
    recover_tool_errors: bool,
}

impl LeafBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let defaults = PipelineSettings::default();
        Self {
            name: name.into(),
            instruction: None,
            llm: None,
            tools: Vec::new(),
            output_key: None,
            contract: OutputContract::Text,
            at_most_once: Vec::new(),
            violation_policy: ViolationPolicy::default(),
            skip_when_empty: None,
            max_steps: defaults.max_steps,
            tool_timeout: defaults.tool_timeout,
            recover_tool_errors: false,
        }
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn output_contract(mut self, contract: OutputContract) -> Self {
        self.contract = contract;
        self
    }

    /// 每次运行中该工具最多调用一次
    pub fn tool_at_most_once(mut self, tool: impl Into<String>) -> Self {
        self.at_most_once.push(tool.into());
        self
    }

    pub fn on_violation(mut self, policy: ViolationPolicy) -> Self {
        self.violation_policy = policy;
        self
    }

    /// 状态键 key 为空时直接写入 fallback，不调用推理与工具
    pub fn skip_when_empty(mut self, key: impl Into<String>, fallback: Value) -> Self {
        self.skip_when_empty = Some(EmptyGuard {
            key: key.into(),
            fallback,
        });
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn settings(self, settings: PipelineSettings) -> Self {
        self.max_steps(settings.max_steps)
            .tool_timeout(settings.tool_timeout)
    }

    /// 工具执行失败时回灌给模型而不是中止
    pub fn recover_tool_errors(mut self, enabled: bool) -> Self {
        self.recover_tool_errors = enabled;
        self
    }

    pub fn build(self) -> Result<LeafHandler, PipelineError> {
        let invalid = |msg: String| PipelineError::Configuration(format!("leaf `{}`: {msg}", self.name));

        let instruction = self
            .instruction
            .clone()
            .ok_or_else(|| invalid("instruction is required".to_string()))?;
        let llm = self
            .llm
            .clone()
            .ok_or_else(|| invalid("inference client is required".to_string()))?;
        if self.max_steps == 0 {
            return Err(invalid("max_steps must be at least 1".to_string()));
        }

        let mut registry = ToolRegistry::new();
        for tool in &self.tools {
            registry.register(Arc::clone(tool))?;
        }
        for name in &self.at_most_once {
            if !registry.contains(name) {
                return Err(invalid(format!("at-most-once tool `{name}` is not registered")));
            }
        }
        if self.skip_when_empty.is_some() && self.output_key.is_none() {
            return Err(invalid("skip_when_empty requires an output key".to_string()));
        }
        let contract = match &self.contract {
            OutputContract::Text => CompiledContract::Text,
            OutputContract::Json(schema) => CompiledContract::Json(
                compile_schema(schema).map_err(|e| invalid(format!("output {e}")))?,
            ),
        };

        Ok(LeafHandler {
            name: self.name,
            instruction,
            llm,
            broker: ToolBroker::new(registry, self.tool_timeout),
            output_key: self.output_key,
            contract,
            at_most_once: self.at_most_once.into_iter().collect(),
            violation_policy: self.violation_policy,
            skip_when_empty: self.skip_when_empty,
            max_steps: self.max_steps,
            recovery: RecoveryEngine::new().with_tool_error_recovery(self.recover_tool_errors),
        })
    }
}
