use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolError};

/// 今日日期；可注入固定日期
pub struct GetTodayDateTool {
    fixed: Option<NaiveDate>,
}

impl GetTodayDateTool {
    pub fn new() -> Self {
        Self { fixed: None }
    }

    pub fn fixed(date: NaiveDate) -> Self {
        Self { fixed: Some(date) }
    }

    pub fn today(&self) -> NaiveDate {
        self.fixed.unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}

impl Default for GetTodayDateTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GetTodayDateTool {
    fn name(&self) -> &str {
        "get_today_date"
    }

    fn description(&self) -> &str {
        "Return today's date as YYYY-MM-DD."
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(Value::String(self.today().format("%Y-%m-%d").to_string()))
    }
}
