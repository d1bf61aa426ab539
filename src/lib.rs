//! Parent Concierge - 新手父母对话助手
//!
//! 模块划分：
//! - **artifacts**: 版本化的二进制制品（图表）存储
//! - **care**: 宝宝档案、护理事件、日统计与图表渲染
//! - **cli**: 命令行前端输入解析
//! - **concierge**: 具体的 handler 树（路由、建档、记录、日汇总）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复决策、turn 取消监管、优雅关闭
//! - **llm**: 推理客户端抽象、重试退避、OpenAI 兼容实现与脚本化 Mock
//! - **observability**: tracing 初始化
//! - **pipeline**: Leaf / Sequential / Parallel handler、事件与 Turn Runner
//! - **session**: 会话上下文（状态 + 历史）与会话服务
//! - **tools**: 工具 trait、注册表、校验调度器与具体工具

pub mod artifacts;
pub mod care;
pub mod cli;
pub mod concierge;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod tools;
