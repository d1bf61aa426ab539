pub mod agent_tool;
pub mod care_log;
pub mod chart;
pub mod executor;
pub mod profile;
pub mod registry;
pub mod schema;
pub mod today;

pub use agent_tool::AgentTool;
pub use care_log::{AddLogTool, ComputeDayStatsTool, GetLogsForDayTool, LOGS_FOR_DAY_KEY};
pub use chart::CreateBarChartTool;
pub use executor::ToolBroker;
pub use profile::{GetProfileTool, SaveProfileTool};
pub use registry::{Tool, ToolContext, ToolError, ToolRegistry};
pub use schema::{
    compile_schema, extract_json_block, schema_for_type, validate_against_schema, validate_with,
};
pub use today::GetTodayDateTool;
