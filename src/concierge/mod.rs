//! 新手父母助手的 handler 树
//!
//! ```text
//! parent_concierge_agent (leaf)
//! ├── get_profile
//! ├── onboarding_agent      (agent-tool，带历史) ── save_profile
//! ├── care_event_agent      (agent-tool)         ── add_log, get_today_date
//! └── daily_summary_agent   (agent-tool, sequential)
//!     ├── care_event_fetcher                     ── get_logs_for_day, get_today_date
//!     ├── parallel_summary_team (parallel)
//!     │   ├── compute_stats                      ── compute_day_stats
//!     │   ├── create_visualization               ── create_bar_chart_artifact
//!     │   └── narrative_summary
//!     └── summary_output_agent
//! ```
//!
//! 汇总链路上除 care_event_fetcher 外都带空输入保护：当天没有事件时直接写入兜底值，
//! 不调用模型，也不调用图表渲染。

pub mod prompts;

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::artifacts::InMemoryArtifactService;
use crate::care::{CareLogStore, ChartRenderer, DayStats, ProfileStore};
use crate::config::PipelineSettings;
use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::pipeline::{HandlerSpec, LeafHandler, OutputContract, ParallelStage, SequentialStage};
use crate::tools::{
    AddLogTool, AgentTool, ComputeDayStatsTool, CreateBarChartTool, GetLogsForDayTool,
    GetProfileTool, GetTodayDateTool, SaveProfileTool, Tool, LOGS_FOR_DAY_KEY,
};

pub const ROOT_AGENT: &str = "parent_concierge_agent";
pub const ONBOARDING_AGENT: &str = "onboarding_agent";
pub const CARE_EVENT_AGENT: &str = "care_event_agent";
pub const DAILY_SUMMARY_AGENT: &str = "daily_summary_agent";
pub const FETCHER_AGENT: &str = "care_event_fetcher";
pub const PARALLEL_SUMMARY_TEAM: &str = "parallel_summary_team";
pub const STATS_AGENT: &str = "compute_stats";
pub const VISUALIZATION_AGENT: &str = "create_visualization";
pub const NARRATIVE_AGENT: &str = "narrative_summary";
pub const SUMMARY_OUTPUT_AGENT: &str = "summary_output_agent";

pub const ONBOARDING_OUTPUT_KEY: &str = "onboarding_output";
pub const CARE_EVENT_OUTPUT_KEY: &str = "care_event_log_output";
pub const DAY_STATS_KEY: &str = "day_stats";
pub const DAY_VISUALIZATION_KEY: &str = "day_visualization";
pub const DAY_SUMMARY_KEY: &str = "day_summary";
pub const DAILY_SUMMARY_OUTPUT_KEY: &str = "daily_summary_output";

/// 当天没有任何护理事件时的汇总文本
pub const NO_EVENTS_MESSAGE: &str = "I don't see any care events logged for that day yet. \
     Once you log feeds, naps or diapers, I can summarise them for you.";
const NO_EVENTS_NARRATIVE: &str = "There are no care events logged for this day yet.";

/// 构造 handler 树所需的外部协作者
#[derive(Clone)]
pub struct ConciergeDeps {
    pub llm: Arc<dyn LlmClient>,
    pub profiles: Arc<dyn ProfileStore>,
    pub care_log: Arc<dyn CareLogStore>,
    pub artifacts: Arc<InMemoryArtifactService>,
    pub renderer: Arc<dyn ChartRenderer>,
    /// 固定"今天"，None 时取本地日期
    pub today: Option<NaiveDate>,
    pub settings: PipelineSettings,
}

impl ConciergeDeps {
    fn today_tool(&self) -> Arc<dyn Tool> {
        Arc::new(match self.today {
            Some(d) => GetTodayDateTool::fixed(d),
            None => GetTodayDateTool::new(),
        })
    }
}

/// 根 handler：对话路由
pub fn build_concierge(deps: &ConciergeDeps) -> Result<HandlerSpec, PipelineError> {
    let onboarding = AgentTool::new(
        Arc::new(build_onboarding_agent(deps)?),
        "Collect or update the baby profile through a short conversation.",
    )
    .with_history();
    let care_event = AgentTool::new(
        Arc::new(build_care_event_agent(deps)?),
        "Log one feed, nap or diaper event described in plain language.",
    );
    let daily_summary = AgentTool::new(
        Arc::new(build_daily_summary(deps)?),
        "Summarise one day of care events. Returns {message, visualization_artifact_id}.",
    );

    let root = LeafHandler::builder(ROOT_AGENT)
        .instruction(prompts::ROOT_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .tool(Arc::new(GetProfileTool::new(deps.profiles.clone())))
        .tool(Arc::new(onboarding))
        .tool(Arc::new(care_event))
        .tool(Arc::new(daily_summary))
        .build()?;
    Ok(root.into())
}

pub fn build_onboarding_agent(deps: &ConciergeDeps) -> Result<HandlerSpec, PipelineError> {
    let leaf = LeafHandler::builder(ONBOARDING_AGENT)
        .instruction(prompts::ONBOARDING_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .tool(Arc::new(SaveProfileTool::new(deps.profiles.clone())))
        .tool_at_most_once("save_profile")
        .output_key(ONBOARDING_OUTPUT_KEY)
        .build()?;
    Ok(leaf.into())
}

pub fn build_care_event_agent(deps: &ConciergeDeps) -> Result<HandlerSpec, PipelineError> {
    let leaf = LeafHandler::builder(CARE_EVENT_AGENT)
        .instruction(prompts::CARE_EVENT_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .tool(Arc::new(AddLogTool::new(deps.care_log.clone())))
        .tool(deps.today_tool())
        .tool_at_most_once("add_log")
        .output_key(CARE_EVENT_OUTPUT_KEY)
        .build()?;
    Ok(leaf.into())
}

/// 日汇总：取数 -> 并行（统计 / 图表 / 叙述）-> 汇总输出
pub fn build_daily_summary(deps: &ConciergeDeps) -> Result<HandlerSpec, PipelineError> {
    let fetcher = LeafHandler::builder(FETCHER_AGENT)
        .instruction(prompts::FETCHER_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .tool(Arc::new(GetLogsForDayTool::new(deps.care_log.clone())))
        .tool(deps.today_tool())
        .tool_at_most_once("get_logs_for_day")
        .output_key(LOGS_FOR_DAY_KEY)
        .output_contract(OutputContract::Json(json!({"type": "array"})))
        .build()?;

    let stats = LeafHandler::builder(STATS_AGENT)
        .instruction(prompts::STATS_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .tool(Arc::new(ComputeDayStatsTool))
        .tool_at_most_once("compute_day_stats")
        .output_key(DAY_STATS_KEY)
        .output_contract(OutputContract::Json(day_stats_schema()))
        .skip_when_empty(LOGS_FOR_DAY_KEY, empty_day_stats())
        .build()?;

    let visualization = LeafHandler::builder(VISUALIZATION_AGENT)
        .instruction(prompts::VISUALIZATION_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .tool(Arc::new(CreateBarChartTool::new(
            deps.renderer.clone(),
            deps.artifacts.clone(),
        )))
        .tool_at_most_once("create_bar_chart_artifact")
        .output_key(DAY_VISUALIZATION_KEY)
        .output_contract(OutputContract::Json(json!({
            "type": "object",
            "properties": {"artifact_id": {"type": ["string", "null"]}},
            "required": ["artifact_id"]
        })))
        .skip_when_empty(LOGS_FOR_DAY_KEY, json!({"artifact_id": null}))
        .build()?;

    let narrative = LeafHandler::builder(NARRATIVE_AGENT)
        .instruction(prompts::NARRATIVE_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .output_key(DAY_SUMMARY_KEY)
        .skip_when_empty(LOGS_FOR_DAY_KEY, json!(NO_EVENTS_NARRATIVE))
        .build()?;

    let team = ParallelStage::new(
        PARALLEL_SUMMARY_TEAM,
        vec![stats.into(), visualization.into(), narrative.into()],
    )?;

    let output = LeafHandler::builder(SUMMARY_OUTPUT_AGENT)
        .instruction(prompts::SUMMARY_OUTPUT_INSTRUCTION)
        .llm(deps.llm.clone())
        .settings(deps.settings)
        .output_key(DAILY_SUMMARY_OUTPUT_KEY)
        .output_contract(OutputContract::Json(json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "minLength": 1},
                "visualization_artifact_id": {"type": ["string", "null"]}
            },
            "required": ["message", "visualization_artifact_id"]
        })))
        .skip_when_empty(
            LOGS_FOR_DAY_KEY,
            json!({"message": NO_EVENTS_MESSAGE, "visualization_artifact_id": null}),
        )
        .build()?;

    let pipeline = SequentialStage::new(
        DAILY_SUMMARY_AGENT,
        vec![fetcher.into(), team.into(), output.into()],
    )?;
    Ok(pipeline.into())
}

fn empty_day_stats() -> Value {
    serde_json::to_value(DayStats::default()).unwrap_or(Value::Null)
}

fn day_stats_schema() -> Value {
    let counter = json!({"type": "object", "required": ["count"]});
    json!({
        "type": "object",
        "properties": {
            "feeds": counter,
            "naps": counter,
            "diapers": counter,
            "first_event_time": {"type": ["string", "null"]},
            "last_event_time": {"type": ["string", "null"]}
        },
        "required": ["feeds", "naps", "diapers"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::{JsonCareLogStore, JsonProfileStore, SvgBarChart};
    use crate::llm::ScriptedLlmClient;

    async fn deps(dir: &std::path::Path) -> ConciergeDeps {
        ConciergeDeps {
            llm: Arc::new(ScriptedLlmClient::new()),
            profiles: Arc::new(JsonProfileStore::open(dir.join("profile.json")).await.unwrap()),
            care_log: Arc::new(JsonCareLogStore::open(dir.join("log.json")).await.unwrap()),
            artifacts: Arc::new(InMemoryArtifactService::new()),
            renderer: Arc::new(SvgBarChart::default()),
            today: NaiveDate::from_ymd_opt(2025, 11, 19),
            settings: PipelineSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_tree_shape() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps(dir.path()).await;

        let root = build_concierge(&deps).unwrap();
        assert_eq!(root.name(), ROOT_AGENT);

        let summary = build_daily_summary(&deps).unwrap();
        assert_eq!(summary.designated_output_key(), Some(DAILY_SUMMARY_OUTPUT_KEY));
        assert_eq!(
            summary.output_keys(),
            vec![
                LOGS_FOR_DAY_KEY.to_string(),
                DAY_STATS_KEY.to_string(),
                DAY_VISUALIZATION_KEY.to_string(),
                DAY_SUMMARY_KEY.to_string(),
                DAILY_SUMMARY_OUTPUT_KEY.to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_stats_fallback_matches_schema() {
        let fallback = empty_day_stats();
        assert_eq!(fallback["feeds"]["count"], 0);
        assert!(crate::tools::validate_against_schema(&day_stats_schema(), &fallback).is_ok());
    }
}
