//! Scout - 自主任务执行循环
//!
//! 模块划分：
//! - **agent**: 按配置装配会话（后端、记忆、能力清单）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复引擎、主循环状态与会话报告
//! - **llm**: 补全 / 嵌入后端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 哈希嵌入）
//! - **memory**: 有界对话窗口、带评分检索的长期记忆、重要度评分
//! - **observability**: tracing 初始化与阶段观察者
//! - **react**: 指令解析、Prompt 模板、编排主循环
//! - **tools**: 能力描述、注册表与内置能力

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{AgentError, LoopState, SessionOutcome, SessionReport, StepOutcome};
pub use react::{LoopOptions, OrchestrationLoop, RetrievalMode};
