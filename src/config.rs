//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONCIERGE__*` 覆盖（双下划线表示嵌套，如 `CONCIERGE__LLM__PROVIDER=mock`）。
//! 所有键都有默认值，缺少配置文件也能启动。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub pipeline: PipelineSection,
}

/// [app] 段：应用名、开发用户 / 会话 ID、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub user_id: String,
    pub session_id: String,
    /// profile.json 与 care_log.json 所在目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "parent_concierge".to_string(),
            user_id: "dev-user-1".to_string(),
            session_id: "local-dev-session-1".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择、端点与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai-compatible / mock
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub timeouts: LlmTimeoutsSection,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai-compatible".to_string(),
            model: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeouts: LlmTimeoutsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次推理请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [llm.retry] 段：瞬时故障重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub exp_base: u32,
    pub retryable_status: Vec<u16>,
    pub retry_on_timeout: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay_ms: 1000,
            exp_base: 7,
            retryable_status: vec![429, 500, 503, 504],
            retry_on_timeout: false,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// [pipeline] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 每个 leaf handler 的推理步数上限
    pub max_steps: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self { max_steps: 12 }
    }
}

/// 构造 handler 时用到的运行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_steps: usize,
    pub tool_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_steps: 12,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_steps: self.pipeline.max_steps.max(1),
            tool_timeout: Duration::from_secs(self.tools.tool_timeout_secs),
        }
    }
}

/// 从 config 目录加载配置，环境变量 CONCIERGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONCIERGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONCIERGE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("llm.retry.retryable_status")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.name, "parent_concierge");
        assert_eq!(cfg.app.session_id, "local-dev-session-1");
        assert_eq!(cfg.llm.model, "gemini-2.5-flash");
        assert_eq!(cfg.llm.retry.attempts, 5);
        assert_eq!(cfg.llm.retry.exp_base, 7);
        assert_eq!(cfg.llm.retry.retryable_status, vec![429, 500, 503, 504]);
        assert_eq!(cfg.pipeline_settings().tool_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_explicit_file_overrides_and_keeps_other_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nprovider = \"mock\"\n\n[llm.retry]\nattempts = 2\n\n[pipeline]\nmax_steps = 4"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.retry.attempts, 2);
        assert_eq!(cfg.llm.retry.initial_delay_ms, 1000);
        assert_eq!(cfg.pipeline.max_steps, 4);
        assert_eq!(cfg.app.user_id, "dev-user-1");
    }
}
