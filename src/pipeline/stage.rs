//! 组合阶段：Sequential（按序）与 Parallel（扇出/扇入）
//!
//! 组合节点自身不调用推理或工具，只负责排序/并发子节点并维护上下文可见性：
//! - Sequential 在同一个上下文上逐个运行，后一个子节点能看到前面所有写入；
//! - Parallel 在进入时为每个子节点 fork 同一份快照，全部结束后一次性合并写入。

use std::collections::{BTreeSet, HashSet};

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};

use crate::core::PipelineError;
use crate::pipeline::{EventPayload, HandlerOutcome, HandlerSpec, TurnScope};
use crate::session::SessionContext;

/// Sequential 失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequentialPolicy {
    /// 首个失败即中止剩余子节点
    #[default]
    FailFast,
    /// 记录失败并继续运行后续子节点
    ContinueOnError,
}

/// Parallel 汇合策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelPolicy {
    /// 首个失败时取消仍在运行的兄弟节点
    #[default]
    FailFast,
    /// 全部运行结束后汇总所有错误
    CollectAll,
}

pub struct SequentialStage {
    name: String,
    children: Vec<HandlerSpec>,
    policy: SequentialPolicy,
}

impl SequentialStage {
    pub fn new(name: impl Into<String>, children: Vec<HandlerSpec>) -> Result<Self, PipelineError> {
        let name = name.into();
        if children.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "sequential stage `{name}` has no children"
            )));
        }
        Ok(Self {
            name,
            children,
            policy: SequentialPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: SequentialPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[HandlerSpec] {
        &self.children
    }

    pub async fn run(
        &self,
        ctx: &mut SessionContext,
        scope: &TurnScope,
    ) -> Result<HandlerOutcome, PipelineError> {
        tracing::info!(stage = %self.name, children = self.children.len(), "sequential stage started");
        let mut outcome = HandlerOutcome {
            handler: self.name.clone(),
            ..HandlerOutcome::default()
        };
        let mut last_output = None;

        for child in &self.children {
            if scope.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match child.run(ctx, scope).await {
                Ok(child_outcome) => {
                    outcome.written.extend(child_outcome.written);
                    outcome.failures.extend(child_outcome.failures);
                    last_output = child_outcome.output;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => match self.policy {
                    SequentialPolicy::FailFast => {
                        tracing::warn!(stage = %self.name, child = %child.name(), error = %e, "aborting stage");
                        return Err(PipelineError::stage_abort(&self.name, e));
                    }
                    SequentialPolicy::ContinueOnError => {
                        tracing::warn!(stage = %self.name, child = %child.name(), error = %e, "child failed, continuing");
                        outcome.failures.push(e);
                        last_output = None;
                    }
                },
            }
        }

        outcome.output = match self.children.last().and_then(HandlerSpec::designated_output_key) {
            Some(key) => ctx.get(key).cloned(),
            None => last_output,
        };
        tracing::info!(stage = %self.name, failures = outcome.failures.len(), "sequential stage finished");
        Ok(outcome)
    }
}

pub struct ParallelStage {
    name: String,
    children: Vec<HandlerSpec>,
    policy: ParallelPolicy,
}

impl ParallelStage {
    /// 构造时检查子节点输出键互不相交，冲突属于配置错误
    pub fn new(name: impl Into<String>, children: Vec<HandlerSpec>) -> Result<Self, PipelineError> {
        let name = name.into();
        if children.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "parallel stage `{name}` has no children"
            )));
        }
        // 同一子节点内部（如顺序阶段）重复写同一个键是合法的，只检查子节点之间的交集
        let mut seen = HashSet::new();
        for child in &children {
            let keys: BTreeSet<String> = child.output_keys().into_iter().collect();
            for key in keys {
                if !seen.insert(key.clone()) {
                    return Err(PipelineError::SessionInvariantViolation(format!(
                        "parallel stage `{name}`: output key `{key}` is written by more than one child"
                    )));
                }
            }
        }
        Ok(Self {
            name,
            children,
            policy: ParallelPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: ParallelPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[HandlerSpec] {
        &self.children
    }

    pub async fn run(
        &self,
        ctx: &mut SessionContext,
        scope: &TurnScope,
    ) -> Result<HandlerOutcome, PipelineError> {
        if scope.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tracing::info!(stage = %self.name, children = self.children.len(), "parallel stage started");
        scope.emit(
            &self.name,
            EventPayload::Text {
                text: format!("running {} handlers in parallel", self.children.len()),
            },
            false,
        );

        let fork_point = ctx.history_len();
        let mut pending: FuturesUnordered<_> = self
            .children
            .iter()
            .enumerate()
            .map(|(index, child)| {
                let mut branch = ctx.fork();
                async move {
                    let result = child.run(&mut branch, scope).await;
                    (index, branch, result)
                }
            })
            .collect();

        let mut finished: Vec<Option<(SessionContext, HandlerOutcome)>> =
            (0..self.children.len()).map(|_| None).collect();
        let mut errors: Vec<(usize, PipelineError)> = Vec::new();

        while let Some((index, branch, result)) = pending.next().await {
            match result {
                Ok(outcome) => finished[index] = Some((branch, outcome)),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => match self.policy {
                    ParallelPolicy::FailFast => {
                        tracing::warn!(
                            stage = %self.name,
                            child = %self.children[index].name(),
                            outstanding = pending.len(),
                            error = %e,
                            "child failed, cancelling outstanding siblings"
                        );
                        // drop 掉未完成的 future 即取消其推理与工具调用
                        drop(pending);
                        return Err(PipelineError::stage_abort(&self.name, e));
                    }
                    ParallelPolicy::CollectAll => errors.push((index, e)),
                },
            }
        }
        drop(pending);

        let mut outcome = HandlerOutcome {
            handler: self.name.clone(),
            ..HandlerOutcome::default()
        };
        let mut branches = Vec::new();
        for (branch, child_outcome) in finished.into_iter().flatten() {
            branches.push(branch.into_branch(&child_outcome.written, fork_point));
            outcome.written.extend(child_outcome.written);
            outcome.failures.extend(child_outcome.failures);
        }
        ctx.commit_branches(branches)?;

        let mut merged = Map::new();
        for key in &outcome.written {
            if let Some(v) = ctx.get(key) {
                merged.insert(key.clone(), v.clone());
            }
        }
        outcome.output = Some(Value::Object(merged));

        if !errors.is_empty() {
            errors.sort_by_key(|(index, _)| *index);
            tracing::warn!(stage = %self.name, failed = errors.len(), "parallel stage finished with failures");
            return Err(PipelineError::StageAbort {
                stage: self.name.clone(),
                failures: errors.into_iter().map(|(_, e)| e).collect(),
            });
        }
        tracing::info!(stage = %self.name, written = outcome.written.len(), "parallel stage joined");
        Ok(outcome)
    }
}
