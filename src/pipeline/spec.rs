//! Handler 树：Leaf / Sequential / Parallel 三种变体共享一个 run 契约
//!
//! 树在进程启动时构造一次，之后不可变；每次执行只在传入的 SessionContext 上读写。

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::core::PipelineError;
use crate::pipeline::{LeafHandler, ParallelStage, SequentialStage, TurnScope};
use crate::session::SessionContext;

pub enum HandlerSpec {
    Leaf(LeafHandler),
    Sequential(SequentialStage),
    Parallel(ParallelStage),
}

/// 一次 handler 执行的结果
#[derive(Debug, Default)]
pub struct HandlerOutcome {
    pub handler: String,
    /// 本次执行写入的输出键（含子节点）
    pub written: Vec<String>,
    /// 指定输出值：有输出键时为该键的值，否则为最终值
    pub output: Option<Value>,
    /// continue-on-error 策略下被记录但未中止执行的子节点失败
    pub failures: Vec<PipelineError>,
}

impl HandlerSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Leaf(l) => l.name(),
            Self::Sequential(s) => s.name(),
            Self::Parallel(p) => p.name(),
        }
    }

    /// 整棵子树可能写入的所有输出键
    pub fn output_keys(&self) -> Vec<String> {
        match self {
            Self::Leaf(l) => l.output_key().map(|k| vec![k.to_string()]).unwrap_or_default(),
            Self::Sequential(s) => s.children().iter().flat_map(HandlerSpec::output_keys).collect(),
            Self::Parallel(p) => p.children().iter().flat_map(HandlerSpec::output_keys).collect(),
        }
    }

    /// 代表该子树结果的输出键：leaf 为自身输出键，sequential 为最后一个子节点的，parallel 没有
    pub fn designated_output_key(&self) -> Option<&str> {
        match self {
            Self::Leaf(l) => l.output_key(),
            Self::Sequential(s) => s.children().last().and_then(HandlerSpec::designated_output_key),
            Self::Parallel(_) => None,
        }
    }

    pub fn run<'a>(
        &'a self,
        ctx: &'a mut SessionContext,
        scope: &'a TurnScope,
    ) -> BoxFuture<'a, Result<HandlerOutcome, PipelineError>> {
        match self {
            Self::Leaf(l) => Box::pin(l.run(ctx, scope)),
            Self::Sequential(s) => Box::pin(s.run(ctx, scope)),
            Self::Parallel(p) => Box::pin(p.run(ctx, scope)),
        }
    }
}

impl From<LeafHandler> for HandlerSpec {
    fn from(leaf: LeafHandler) -> Self {
        Self::Leaf(leaf)
    }
}

impl From<SequentialStage> for HandlerSpec {
    fn from(stage: SequentialStage) -> Self {
        Self::Sequential(stage)
    }
}

impl From<ParallelStage> for HandlerSpec {
    fn from(stage: ParallelStage) -> Self {
        Self::Parallel(stage)
    }
}
