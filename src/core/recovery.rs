//! 错误恢复引擎
//!
//! 根据 PipelineError 类型与 leaf 的配置返回 RecoveryAction，供 leaf 的工具循环决定是回灌修正还是终止。

use crate::core::{PipelineError, RecoveryAction};

/// 语义化错误恢复：参数错误总是回灌；执行错误仅在 leaf 允许时回灌；其余终止
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine {
    recover_tool_errors: bool,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 允许将工具执行失败回灌给模型
    pub fn with_tool_error_recovery(mut self, enabled: bool) -> Self {
        self.recover_tool_errors = enabled;
        self
    }

    pub fn handle(&self, err: &PipelineError) -> RecoveryAction {
        match err {
            PipelineError::ToolValidation { tool, reason } => RecoveryAction::ReportToModel(format!(
                "The call to `{tool}` was rejected before running: {reason}. \
                 Fix the arguments so they match the tool's parameter schema and call it again."
            )),
            PipelineError::ProtocolViolation { detail, .. } => RecoveryAction::ReportToModel(format!(
                "That call was not executed: {detail}. Continue without repeating it."
            )),
            PipelineError::ToolExecution { tool, reason } if self.recover_tool_errors => {
                RecoveryAction::ReportToModel(format!(
                    "The tool `{tool}` failed: {reason}. You may retry with different arguments or continue without it."
                ))
            }
            _ => RecoveryAction::Abort,
        }
    }
}
