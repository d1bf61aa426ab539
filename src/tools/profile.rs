//! 宝宝档案工具：get_profile / save_profile

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::care::{BabyProfile, ProfileStore};
use crate::tools::schema::schema_for_type;
use crate::tools::{Tool, ToolContext, ToolError};

/// 读取档案：返回 `{"exists": bool, "profile": {...} | null}`
pub struct GetProfileTool {
    store: Arc<dyn ProfileStore>,
}

impl GetProfileTool {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetProfileTool {
    fn name(&self) -> &str {
        "get_profile"
    }

    fn description(&self) -> &str {
        "Load the saved baby profile. Returns {\"exists\": bool, \"profile\": object|null}."
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let profile = self
            .store
            .get()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(match profile {
            Some(p) => json!({"exists": true, "profile": p}),
            None => json!({"exists": false, "profile": null}),
        })
    }
}

/// 保存档案（整体覆盖）
pub struct SaveProfileTool {
    store: Arc<dyn ProfileStore>,
}

impl SaveProfileTool {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SaveProfileTool {
    fn name(&self) -> &str {
        "save_profile"
    }

    fn description(&self) -> &str {
        "Save the baby profile, replacing any existing one. date_of_birth is YYYY-MM-DD; \
         feeding_type is one of breast, bottle, mixed."
    }

    fn parameters_schema(&self) -> Value {
        schema_for_type::<BabyProfile>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let profile: BabyProfile =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        self.store
            .set(&profile)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(json!({"status": "success", "profile": profile}))
    }
}
