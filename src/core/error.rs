//! 流水线错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 PipelineError 决定 ReportToModel（回灌给模型自我修正）或 Abort。

use thiserror::Error;

use crate::llm::LlmError;

/// 流水线执行过程中可能出现的错误（推理、工具、协议、输出契约、阶段、会话）
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 可重试的推理失败；仅当模型未包裹重试策略时才会冒泡到这里
    #[error("transient inference failure in {handler}: {source}")]
    TransientInference { handler: String, source: LlmError },

    #[error("inference failed in {handler}: {source}")]
    TerminalInference { handler: String, source: LlmError },

    #[error("invalid arguments for tool {tool}: {reason}")]
    ToolValidation { tool: String, reason: String },

    #[error("tool {tool} failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("protocol violation in {handler}: {detail}")]
    ProtocolViolation { handler: String, detail: String },

    #[error("malformed output from {handler}: {detail}")]
    MalformedOutput { handler: String, detail: String },

    #[error("stage {stage} aborted: {}", join_failures(.failures))]
    StageAbort {
        stage: String,
        failures: Vec<PipelineError>,
    },

    #[error("session invariant violated: {0}")]
    SessionInvariantViolation(String),

    #[error("session {0} already has a turn in progress")]
    SessionBusy(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),
}

fn join_failures(failures: &[PipelineError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    /// 包装子节点失败为阶段中止
    pub fn stage_abort(stage: impl Into<String>, failure: PipelineError) -> Self {
        Self::StageAbort {
            stage: stage.into(),
            failures: vec![failure],
        }
    }

    /// 错误类别名（用于事件与审计日志）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientInference { .. } => "transient_inference",
            Self::TerminalInference { .. } => "terminal_inference",
            Self::ToolValidation { .. } => "tool_validation",
            Self::ToolExecution { .. } => "tool_execution",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::MalformedOutput { .. } => "malformed_output",
            Self::StageAbort { .. } => "stage_abort",
            Self::SessionInvariantViolation(_) => "session_invariant_violation",
            Self::SessionBusy(_) => "session_busy",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Cancelled => "cancelled",
            Self::Configuration(_) => "configuration",
        }
    }

    /// 是否为取消导致（取消不算失败，也不应被 continue-on-error 吞掉）
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::StageAbort { failures, .. } => failures.iter().any(PipelineError::is_cancelled),
            _ => false,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将错误描述作为工具结果回灌，让模型在下一轮推理中修正
    ReportToModel(String),
    /// 终止当前 handler
    Abort,
}
