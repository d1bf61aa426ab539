//! 护理日志工具：add_log / get_logs_for_day / compute_day_stats

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::care::{compute_day_stats, CareEvent, CareLogStore};
use crate::tools::schema::schema_for_type;
use crate::tools::{Tool, ToolContext, ToolError};

/// 未显式传入事件时，compute_day_stats / create_bar_chart_artifact 读取的状态键
pub const LOGS_FOR_DAY_KEY: &str = "logs_for_day";

pub struct AddLogTool {
    store: Arc<dyn CareLogStore>,
}

impl AddLogTool {
    pub fn new(store: Arc<dyn CareLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AddLogTool {
    fn name(&self) -> &str {
        "add_log"
    }

    fn description(&self) -> &str {
        "Append one care event. event_type is feed, nap or diaper; timestamp is ISO-8601 \
         (YYYY-MM-DDTHH:MM:SS). Use volume_ml for feeds and duration_minutes for naps."
    }

    fn parameters_schema(&self) -> Value {
        schema_for_type::<CareEvent>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let event: CareEvent =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if event.parsed_timestamp().is_none() {
            return Err(ToolError::InvalidArguments(format!(
                "timestamp `{}` is not an ISO-8601 date-time",
                event.timestamp
            )));
        }
        self.store
            .append(&event)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(json!({"status": "success", "event": event}))
    }
}

#[derive(Deserialize, JsonSchema)]
struct DayArgs {
    /// YYYY-MM-DD
    date: String,
}

pub struct GetLogsForDayTool {
    store: Arc<dyn CareLogStore>,
}

impl GetLogsForDayTool {
    pub fn new(store: Arc<dyn CareLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetLogsForDayTool {
    fn name(&self) -> &str {
        "get_logs_for_day"
    }

    fn description(&self) -> &str {
        "Return every care event logged on the given calendar day (YYYY-MM-DD) as a JSON array."
    }

    fn parameters_schema(&self) -> Value {
        schema_for_type::<DayArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: DayArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let events = self
            .store
            .query_by_day(&args.date)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        serde_json::to_value(events).map_err(|e| ToolError::Execution(e.to_string()))
    }
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct EventsArgs {
    /// 省略时使用会话状态中的 logs_for_day
    pub events: Option<Vec<CareEvent>>,
}

/// 从参数或会话状态取事件列表
pub(crate) fn events_from(args: Value, ctx: &ToolContext) -> Result<Vec<CareEvent>, ToolError> {
    let args: EventsArgs =
        serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
    if let Some(events) = args.events {
        return Ok(events);
    }
    match ctx.state.get(LOGS_FOR_DAY_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => serde_json::from_str(s).map_err(|e| {
            ToolError::InvalidArguments(format!("`{LOGS_FOR_DAY_KEY}` is not an event list: {e}"))
        }),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            ToolError::InvalidArguments(format!("`{LOGS_FOR_DAY_KEY}` is not an event list: {e}"))
        }),
    }
}

/// 计算一天的统计：喂奶次数/总量、小睡次数/总时长、换尿布次数、首末事件时间
pub struct ComputeDayStatsTool;

#[async_trait]
impl Tool for ComputeDayStatsTool {
    fn name(&self) -> &str {
        "compute_day_stats"
    }

    fn description(&self) -> &str {
        "Compute totals for a day's care events: feed count and total ml, nap count and total \
         minutes, diaper count, first and last event time. Omit `events` to use the fetched day."
    }

    fn parameters_schema(&self) -> Value {
        schema_for_type::<EventsArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let events = events_from(args, ctx)?;
        serde_json::to_value(compute_day_stats(&events)).map_err(|e| ToolError::Execution(e.to_string()))
    }
}
