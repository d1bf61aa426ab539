//! Sequential / Parallel 阶段的可见性与失败策略

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use concierge::core::PipelineError;
use concierge::llm::{LlmError, ScriptedLlmClient};
use concierge::pipeline::{
    HandlerSpec, LeafHandler, ParallelPolicy, ParallelStage, SequentialPolicy, SequentialStage,
    TurnScope,
};
use concierge::session::{Role, SessionContext, SessionIds};
use concierge::tools::{Tool, ToolContext, ToolError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// 睡一会儿再返回，用来让并行兄弟先完成
struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "sleeps briefly"
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({"slept": true}))
    }
}

fn leaf(llm: &Arc<ScriptedLlmClient>, name: &str, instruction: &str, key: &str) -> HandlerSpec {
    LeafHandler::builder(name)
        .instruction(instruction)
        .llm(llm.clone())
        .output_key(key)
        .build()
        .unwrap()
        .into()
}

fn ctx() -> SessionContext {
    let mut c = SessionContext::new(SessionIds::new("app", "u", "s"));
    c.append(concierge::session::Message::user("summarise today"));
    c
}

fn scope() -> TurnScope {
    TurnScope::new(CancellationToken::new())
}

#[tokio::test]
async fn test_sequential_child_sees_earlier_writes_only() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_final("first", "alpha");
    llm.push_final("second", "beta");
    llm.push_final("third", "gamma");

    let stage = SequentialStage::new(
        "seq",
        vec![
            leaf(&llm, "first", "later={b?}", "a"),
            leaf(&llm, "second", "a={a} c={c?}", "b"),
            leaf(&llm, "third", "a={a} b={b}", "c"),
        ],
    )
    .unwrap();
    let spec = HandlerSpec::from(stage);

    let mut c = ctx();
    let outcome = spec.run(&mut c, &scope()).await.unwrap();

    assert_eq!(llm.requests_for("first")[0].instruction, "later=");
    assert_eq!(llm.requests_for("second")[0].instruction, "a=alpha c=");
    assert_eq!(llm.requests_for("third")[0].instruction, "a=alpha b=beta");
    assert_eq!(outcome.written, vec!["a", "b", "c"]);
    // 指定输出为最后一个子节点的输出键
    assert_eq!(outcome.output, Some(json!("gamma")));
}

#[tokio::test]
async fn test_sequential_fail_fast_skips_remaining_children() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_error("first", LlmError::Status { status: 400, message: "bad request".into() });
    llm.push_final("second", "never");

    let spec = HandlerSpec::from(
        SequentialStage::new(
            "seq",
            vec![leaf(&llm, "first", "go", "a"), leaf(&llm, "second", "go", "b")],
        )
        .unwrap(),
    );
    let mut c = ctx();
    let err = spec.run(&mut c, &scope()).await.unwrap_err();

    assert!(matches!(err, PipelineError::StageAbort { ref stage, .. } if stage == "seq"));
    assert!(llm.requests_for("second").is_empty());
    assert_eq!(llm.remaining("second"), 1);
    assert!(c.get("a").is_none());
}

#[tokio::test]
async fn test_sequential_continue_on_error_records_failure() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_error("first", LlmError::Status { status: 400, message: "bad request".into() });
    llm.push_final("second", "done");

    let spec = HandlerSpec::from(
        SequentialStage::new(
            "seq",
            vec![leaf(&llm, "first", "go", "a"), leaf(&llm, "second", "a={a?}", "b")],
        )
        .unwrap()
        .with_policy(SequentialPolicy::ContinueOnError),
    );
    let mut c = ctx();
    let outcome = spec.run(&mut c, &scope()).await.unwrap();

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(llm.requests_for("second")[0].instruction, "a=");
    assert_eq!(c.get("b"), Some(&json!("done")));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_siblings_share_entry_snapshot() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_tool_call("slow_child", "slow", json!({}));
    llm.push_final("slow_child", "slow result");
    llm.push_final("fast_child", "fast result");
    llm.push_final("join", "joined");

    let slow_child: HandlerSpec = LeafHandler::builder("slow_child")
        .instruction("seed={seed}")
        .llm(llm.clone())
        .tool(Arc::new(SlowTool))
        .output_key("slow_out")
        .build()
        .unwrap()
        .into();
    let team = ParallelStage::new(
        "team",
        vec![slow_child, leaf(&llm, "fast_child", "seed={seed}", "fast_out")],
    )
    .unwrap();
    let spec = HandlerSpec::from(
        SequentialStage::new(
            "pipeline",
            vec![team.into(), leaf(&llm, "join", "{slow_out}+{fast_out}", "joined")],
        )
        .unwrap(),
    );

    let mut c = ctx();
    c.set("seed", json!(7));
    spec.run(&mut c, &scope()).await.unwrap();

    // fast_child 先完成，但 slow_child 第二次推理时仍看不到它的写入
    let slow_requests = llm.requests_for("slow_child");
    assert_eq!(slow_requests.len(), 2);
    assert!(!slow_requests[1].state.contains("fast_out"));
    assert_eq!(slow_requests[1].history.last().map(|m| m.role), Some(Role::ToolResult));

    // fan-in 之后两个键同时可见
    assert_eq!(llm.requests_for("join")[0].instruction, "slow result+fast result");
    assert_eq!(c.get("slow_out"), Some(&json!("slow result")));
    assert_eq!(c.get("fast_out"), Some(&json!("fast result")));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_fail_fast_cancels_outstanding_siblings() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_delayed_final("slow", Duration::from_secs(5), "too late");
    llm.push_error("broken", LlmError::Status { status: 400, message: "bad request".into() });

    let spec = HandlerSpec::from(
        ParallelStage::new(
            "team",
            vec![leaf(&llm, "slow", "go", "slow_out"), leaf(&llm, "broken", "go", "broken_out")],
        )
        .unwrap(),
    );
    let mut c = ctx();
    let before = c.history_len();
    let err = spec.run(&mut c, &scope()).await.unwrap_err();

    match err {
        PipelineError::StageAbort { stage, failures } => {
            assert_eq!(stage, "team");
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0], PipelineError::TerminalInference { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(c.get("slow_out").is_none());
    assert_eq!(c.history_len(), before);
}

#[tokio::test]
async fn test_parallel_collect_all_commits_successes_and_aggregates_errors() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_final("ok_child", "fine");
    llm.push_error("broken_a", LlmError::Status { status: 400, message: "a".into() });
    llm.push_final("broken_b", "not json");

    let broken_b: HandlerSpec = LeafHandler::builder("broken_b")
        .instruction("go")
        .llm(llm.clone())
        .output_key("b_out")
        .output_contract(concierge::pipeline::OutputContract::Json(json!({"type": "object"})))
        .build()
        .unwrap()
        .into();
    let spec = HandlerSpec::from(
        ParallelStage::new(
            "team",
            vec![
                leaf(&llm, "broken_a", "go", "a_out"),
                leaf(&llm, "ok_child", "go", "ok_out"),
                broken_b,
            ],
        )
        .unwrap()
        .with_policy(ParallelPolicy::CollectAll),
    );
    let mut c = ctx();
    let err = spec.run(&mut c, &scope()).await.unwrap_err();

    match err {
        PipelineError::StageAbort { failures, .. } => {
            assert_eq!(failures.len(), 2);
            // 按声明顺序排列
            assert!(matches!(failures[0], PipelineError::TerminalInference { ref handler, .. } if handler == "broken_a"));
            assert!(matches!(failures[1], PipelineError::MalformedOutput { ref handler, .. } if handler == "broken_b"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(c.get("ok_out"), Some(&json!("fine")));
    assert!(c.get("a_out").is_none());
    assert!(c.get("b_out").is_none());
}

#[test]
fn test_parallel_duplicate_output_keys_rejected_at_construction() {
    let llm = Arc::new(ScriptedLlmClient::new());
    let result = ParallelStage::new(
        "team",
        vec![leaf(&llm, "one", "go", "same"), leaf(&llm, "two", "go", "same")],
    );
    assert!(matches!(result, Err(PipelineError::SessionInvariantViolation(_))));
}

#[tokio::test]
async fn test_parallel_allows_key_rewritten_inside_one_sequential_child() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_final("draft", "rough notes");
    llm.push_final("refine", "polished notes");
    llm.push_final("stats", "two feeds");

    let rewrite = SequentialStage::new(
        "rewrite",
        vec![
            leaf(&llm, "draft", "go", "draft"),
            leaf(&llm, "refine", "improve {draft}", "draft"),
        ],
    )
    .unwrap();
    let spec = HandlerSpec::from(
        ParallelStage::new("fan", vec![rewrite.into(), leaf(&llm, "stats", "go", "other")]).unwrap(),
    );

    let mut c = ctx();
    spec.run(&mut c, &scope()).await.unwrap();

    assert_eq!(llm.requests_for("refine")[0].instruction, "improve rough notes");
    assert_eq!(c.get("draft"), Some(&json!("polished notes")));
    assert_eq!(c.get("other"), Some(&json!("two feeds")));
}

#[test]
fn test_empty_stages_rejected() {
    assert!(matches!(
        SequentialStage::new("seq", Vec::new()),
        Err(PipelineError::Configuration(_))
    ));
    assert!(matches!(
        ParallelStage::new("team", Vec::new()),
        Err(PipelineError::Configuration(_))
    ));
}
