//! Turn Runner：重试、单写者会话、取消与失败回复

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use concierge::core::{PipelineError, SessionSupervisor};
use concierge::llm::{LlmError, RetryPolicy, RetryingLlmClient, ScriptedLlmClient};
use concierge::pipeline::{
    HandlerSpec, LeafHandler, PipelineEvent, TurnRunner, TurnStatus, APOLOGY_TEXT,
};
use concierge::session::{InMemorySessionService, Message, Part, Role, SessionIds};
use concierge::tools::{Tool, ToolContext, ToolError};
use serde_json::{json, Value};
use tokio::sync::mpsc;

const SESSION: &str = "local-dev-session-1";

async fn runner_with(root: HandlerSpec) -> TurnRunner {
    let sessions = Arc::new(InMemorySessionService::new());
    sessions
        .create_session(SessionIds::new("parent_concierge", "dev-user-1", SESSION))
        .await;
    TurnRunner::new(Arc::new(root), sessions, SessionSupervisor::new())
}

fn unavailable() -> LlmError {
    LlmError::Status {
        status: 503,
        message: "model overloaded".to_string(),
    }
}

fn retrying_leaf(llm: Arc<ScriptedLlmClient>) -> HandlerSpec {
    let client = Arc::new(RetryingLlmClient::new(llm, RetryPolicy::default()));
    LeafHandler::builder("parent_concierge_agent")
        .instruction("Be kind.")
        .llm(client)
        .output_key("reply")
        .build()
        .unwrap()
        .into()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_invisible_when_retry_succeeds() {
    let llm = Arc::new(ScriptedLlmClient::new());
    for _ in 0..4 {
        llm.push_error("parent_concierge_agent", unavailable());
    }
    llm.push_final("parent_concierge_agent", "Hello! How is the little one?");

    let runner = runner_with(retrying_leaf(llm.clone())).await;
    let started = tokio::time::Instant::now();
    let reply = runner.run_turn(SESSION, "hi", None).await.unwrap();

    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.text, "Hello! How is the little one?");
    assert_eq!(llm.requests_for("parent_concierge_agent").len(), 5);
    // 1 + 7 + 49 + 343 秒
    assert!(started.elapsed() >= Duration::from_secs(400));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_produce_apology() {
    let llm = Arc::new(ScriptedLlmClient::new());
    for _ in 0..6 {
        llm.push_error("parent_concierge_agent", unavailable());
    }

    let runner = runner_with(retrying_leaf(llm.clone())).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let reply = runner.run_turn(SESSION, "hi", Some(tx)).await.unwrap();

    assert_eq!(reply.text, APOLOGY_TEXT);
    assert!(matches!(reply.status, TurnStatus::Failed { .. }));
    assert_eq!(llm.requests_for("parent_concierge_agent").len(), 5);
    assert_eq!(llm.remaining("parent_concierge_agent"), 1);

    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    let last = events.last().unwrap();
    assert!(last.terminal);
    assert_eq!(last.author, "parent_concierge_agent");

    // 失败的 turn 不写输出键，但用户消息已进入历史
    let (reply_key, history) = runner
        .sessions()
        .inspect(SESSION, |c| (c.get("reply").cloned(), c.history().to_vec()))
        .await
        .unwrap();
    assert!(reply_key.is_none());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn test_history_persists_across_turns() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_final("parent_concierge_agent", "first answer");
    llm.push_final("parent_concierge_agent", "second answer");
    let root: HandlerSpec = LeafHandler::builder("parent_concierge_agent")
        .instruction("Be kind.")
        .llm(llm.clone())
        .build()
        .unwrap()
        .into();
    let runner = runner_with(root).await;

    runner.run_turn(SESSION, "one", None).await.unwrap();
    let reply = runner.run_turn(SESSION, "two", None).await.unwrap();

    assert_eq!(reply.text, "second answer");
    let second = &llm.requests_for("parent_concierge_agent")[1];
    let texts: Vec<String> = second.history.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["one", "first answer", "two"]);
}

#[tokio::test]
async fn test_concurrent_turn_on_same_session_is_rejected() {
    let llm = Arc::new(ScriptedLlmClient::new());
    let runner = runner_with(retrying_leaf(llm)).await;

    let _lease = runner.sessions().acquire(SESSION).await.unwrap();
    let err = runner.run_turn(SESSION, "hi", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::SessionBusy(ref id) if id == SESSION));

    let err = runner.run_turn("no-such-session", "hi", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::SessionNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_in_flight_turn_without_partial_write() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_delayed_final("parent_concierge_agent", Duration::from_secs(30), "too late");
    let runner = runner_with(retrying_leaf(llm)).await;

    let (reply, cancelled) = tokio::join!(runner.run_turn(SESSION, "hi", None), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.cancel(SESSION)
    });

    assert!(cancelled);
    let reply = reply.unwrap();
    assert_eq!(reply.status, TurnStatus::Cancelled);
    let written = runner
        .sessions()
        .inspect(SESSION, |c| c.get("reply").cloned())
        .await
        .unwrap();
    assert!(written.is_none());

    // 取消登记随 turn 结束释放，会话可以继续使用
    assert!(!runner.cancel(SESSION));
    assert_eq!(runner.supervisor().active_turns(), 0);
}

/// 存储不可用时的 add_log
struct BrokenStore;

#[async_trait]
impl Tool for BrokenStore {
    fn name(&self) -> &str {
        "add_log"
    }

    fn description(&self) -> &str {
        "append a care event"
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::Execution("care log is read-only".to_string()))
    }
}

fn unanswered_calls(history: &[Message]) -> Vec<String> {
    let mut calls = Vec::new();
    let mut results = HashSet::new();
    for part in history.iter().flat_map(|m| m.parts.iter()) {
        match part {
            Part::ToolCall { id, .. } => calls.push(id.clone()),
            Part::ToolResult { id, .. } => {
                results.insert(id.clone());
            }
            _ => {}
        }
    }
    calls.retain(|id| !results.contains(id));
    calls
}

#[tokio::test]
async fn test_failed_tool_turn_leaves_session_usable() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_tool_call("parent_concierge_agent", "add_log", json!({"event_type": "feed"}))
        .push_final("parent_concierge_agent", "How can I help?");
    let root: HandlerSpec = LeafHandler::builder("parent_concierge_agent")
        .instruction("Be kind.")
        .llm(llm.clone())
        .tool(Arc::new(BrokenStore))
        .build()
        .unwrap()
        .into();
    let runner = runner_with(root).await;

    let first = runner.run_turn(SESSION, "log a feed", None).await.unwrap();
    assert!(matches!(first.status, TurnStatus::Failed { .. }));
    assert_eq!(first.text, APOLOGY_TEXT);

    let second = runner.run_turn(SESSION, "hello again", None).await.unwrap();
    assert_eq!(second.status, TurnStatus::Completed);

    let requests = llm.requests_for("parent_concierge_agent");
    assert_eq!(requests.len(), 2);
    assert!(unanswered_calls(&requests[1].history).is_empty());
    assert_eq!(requests[1].history.last().map(|m| m.text()), Some("hello again".to_string()));
}
