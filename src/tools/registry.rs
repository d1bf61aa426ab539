//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! 每个 leaf handler 持有自己可见的一份 ToolRegistry，由 ToolBroker 在调用前做校验、加超时并写审计日志。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

use crate::core::PipelineError;
use crate::llm::ToolDeclaration;
use crate::pipeline::TurnScope;
use crate::session::{ContextSnapshot, Message, SessionIds};
use crate::tools::schema::{compile_schema, validate_with};

/// 工具实现返回的错误
#[derive(Error, Debug)]
pub enum ToolError {
    /// 参数通过了 schema 但语义不合法（如无法解析的日期），会回灌给模型修正
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    /// 工具内部运行的子流水线被取消
    #[error("cancelled")]
    Cancelled,
}

/// 工具执行时可见的上下文：会话标识、状态快照、历史，以及当前 turn 的事件/取消作用域
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub handler: String,
    pub ids: Arc<SessionIds>,
    pub state: ContextSnapshot,
    pub history: Vec<Message>,
    pub scope: TurnScope,
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 function call 中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；Broker 在调用前按此校验，默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// 是否受 Broker 单次调用超时约束；内部各次调用自带超时的组合工具返回 false
    fn bounded_by_call_timeout(&self) -> bool {
        true
    }
}

/// 注册时固定下来的工具条目：参数 schema 只取一次并编译好
#[derive(Clone)]
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: Value,
    validator: Arc<Validator>,
}

/// 工具注册表：按名称存储，名称唯一
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具已存在或参数 schema 无法编译时返回 Configuration 错误
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), PipelineError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(PipelineError::Configuration(format!(
                "tool `{name}` registered twice"
            )));
        }
        let schema = tool.parameters_schema();
        let validator = compile_schema(&schema).map_err(|e| {
            PipelineError::Configuration(format!("tool `{name}` has an unusable parameter schema: {e}"))
        })?;
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                schema,
                validator: Arc::new(validator),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| Arc::clone(&t.tool))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 按注册时编译的 schema 校验参数
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<(), String> {
        match self.tools.get(name) {
            Some(t) => validate_with(&t.validator, args),
            None => Err(format!("unknown tool `{name}`")),
        }
    }

    /// 按名称排序的工具声明，随推理请求发给模型
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(|(name, t)| ToolDeclaration {
                name: name.clone(),
                description: t.tool.description().to_string(),
                parameters: t.schema.clone(),
            })
            .collect()
    }
}
