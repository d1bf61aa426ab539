//! LLM 层：推理客户端抽象、重试策略与实现（OpenAI 兼容 HTTP / Mock / Scripted）

pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiCompatibleClient, TokenUsage};
pub use retry::{RetryPolicy, RetryingLlmClient};
pub use traits::{
    InferenceRequest, InferenceResponse, LlmClient, LlmError, ToolCall, ToolDeclaration,
    TRANSIENT_STATUS,
};

use crate::config::AppConfig;
use crate::core::PipelineError;

/// 按配置创建推理客户端：provider = "mock" 或缺少 API Key 时使用离线回显模型，
/// "openai-compatible" 为套上重试策略的 HTTP 客户端；其他取值属于配置错误
pub fn create_llm_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>, PipelineError> {
    let llm = &config.llm;
    match llm.provider.to_ascii_lowercase().as_str() {
        "mock" => {
            tracing::info!("LLM provider: mock");
            return Ok(Arc::new(MockLlmClient));
        }
        "openai-compatible" | "openai" => {}
        other => {
            return Err(PipelineError::Configuration(format!(
                "unknown llm.provider `{other}` (expected \"openai-compatible\" or \"mock\")"
            )))
        }
    }

    let api_key = std::env::var(&llm.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty());
    let Some(api_key) = api_key else {
        tracing::warn!(
            env = %llm.api_key_env,
            "no API key found, falling back to the offline echo model"
        );
        return Ok(Arc::new(MockLlmClient));
    };

    let client = OpenAiCompatibleClient::new(
        &llm.base_url,
        &llm.model,
        &api_key,
        Duration::from_secs(llm.timeouts.request),
    )
    .map_err(|e| PipelineError::Configuration(format!("cannot build HTTP client: {e}")))?;
    let policy = RetryPolicy::from_config(&llm.retry);
    tracing::info!(
        model = %llm.model,
        base_url = %llm.base_url,
        attempts = policy.attempts,
        "LLM provider: openai-compatible"
    );
    Ok(Arc::new(RetryingLlmClient::new(Arc::new(client), policy)))
}
