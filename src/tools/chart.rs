//! create_bar_chart_artifact：渲染日汇总柱状图并存为会话制品
//!
//! 事件为空时不渲染，直接返回 `{"artifact_id": null, "version": null}`。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::artifacts::{Artifact, InMemoryArtifactService};
use crate::care::{CareEvent, ChartRenderer};
use crate::tools::care_log::{events_from, EventsArgs};
use crate::tools::schema::schema_for_type;
use crate::tools::{Tool, ToolContext, ToolError};

pub struct CreateBarChartTool {
    renderer: Arc<dyn ChartRenderer>,
    artifacts: Arc<InMemoryArtifactService>,
}

impl CreateBarChartTool {
    pub fn new(renderer: Arc<dyn ChartRenderer>, artifacts: Arc<InMemoryArtifactService>) -> Self {
        Self { renderer, artifacts }
    }
}

#[async_trait]
impl Tool for CreateBarChartTool {
    fn name(&self) -> &str {
        "create_bar_chart_artifact"
    }

    fn description(&self) -> &str {
        "Render a bar chart of the day's feeds, naps and diapers and save it as an artifact. \
         Returns {\"artifact_id\": string|null, \"version\": int|null}. Omit `events` to use the fetched day."
    }

    fn parameters_schema(&self) -> Value {
        schema_for_type::<EventsArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let events = events_from(args, ctx)?;
        if events.is_empty() {
            return Ok(json!({"artifact_id": null, "version": null}));
        }
        let image = self
            .renderer
            .render(&events)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let day = events
            .iter()
            .find_map(CareEvent::parsed_timestamp)
            .map(|t| t.date().format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "day".to_string());
        let name = format!("care_summary_{day}.{}", image.file_extension);
        let version = self
            .artifacts
            .save(
                &ctx.ids,
                &name,
                Artifact {
                    mime_type: image.mime_type,
                    data: image.bytes,
                },
            )
            .await;
        Ok(json!({"artifact_id": name, "version": version}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::SvgBarChart;
    use crate::pipeline::TurnScope;
    use crate::session::{SessionContext, SessionIds};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        let c = SessionContext::new(SessionIds::new("app", "u", "s"));
        ToolContext {
            handler: "create_visualization".to_string(),
            ids: c.shared_ids(),
            state: c.snapshot(),
            history: Vec::new(),
            scope: TurnScope::new(CancellationToken::new()),
        }
    }

    #[tokio::test]
    async fn test_saves_versioned_artifact() {
        let artifacts = Arc::new(InMemoryArtifactService::new());
        let tool = CreateBarChartTool::new(Arc::new(SvgBarChart::default()), artifacts.clone());
        let args = json!({"events": [
            {"event_type": "feed", "timestamp": "2025-11-19T07:10:00", "volume_ml": 90}
        ]});
        let ctx = ctx();

        let first = tool.execute(args.clone(), &ctx).await.unwrap();
        assert_eq!(first, json!({"artifact_id": "care_summary_2025-11-19.svg", "version": 0}));
        let second = tool.execute(args, &ctx).await.unwrap();
        assert_eq!(second["version"], 1);

        let stored = artifacts
            .load(&ctx.ids, "care_summary_2025-11-19.svg", None)
            .await
            .unwrap();
        assert_eq!(stored.mime_type, "image/svg+xml");
    }

    #[tokio::test]
    async fn test_empty_day_skips_rendering() {
        let artifacts = Arc::new(InMemoryArtifactService::new());
        let tool = CreateBarChartTool::new(Arc::new(SvgBarChart::default()), artifacts.clone());
        let out = tool.execute(json!({}), &ctx()).await.unwrap();
        assert_eq!(out, json!({"artifact_id": null, "version": null}));
        assert!(artifacts.list_names(&ctx().ids).await.is_empty());
    }
}
