//! Agent 错误类型与恢复动作
//!
//! 可恢复错误（能力解析 / 校验 / 执行、指令解析）会被转成下一轮的 Observation；
//! 基础设施错误（补全后端、嵌入后端）对当前会话是致命的。

use thiserror::Error;

/// 会话运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Invalid input for {name}: missing {missing:?}, unexpected {extra:?}")]
    InvalidCapabilityInput {
        name: String,
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("Capability {name} failed: {cause}")]
    CapabilityExecution { name: String, cause: String },

    #[error("Directive parse error: {0}")]
    DirectiveParse(String),

    #[error("Completion backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Duplicate capability: {0}")]
    DuplicateCapability(String),

    /// 在不允许的状态下调用了 initialize / step
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否可恢复：可恢复错误作为下一轮的「上一步工具输出」喂回模型，会话继续
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::UnknownCapability(_)
                | AgentError::InvalidCapabilityInput { .. }
                | AgentError::CapabilityExecution { .. }
                | AgentError::DirectiveParse(_)
        )
    }

    /// 错误种类名（用于会话报告）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::UnknownCapability(_) => "UnknownCapability",
            AgentError::InvalidCapabilityInput { .. } => "InvalidCapabilityInput",
            AgentError::CapabilityExecution { .. } => "CapabilityExecutionError",
            AgentError::DirectiveParse(_) => "DirectiveParseError",
            AgentError::BackendUnavailable(_) => "BackendUnavailable",
            AgentError::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            AgentError::DuplicateCapability(_) => "DuplicateCapability",
            AgentError::InvalidState(_) => "InvalidState",
            AgentError::ConfigError(_) => "ConfigError",
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将错误描述作为 Observation 注入下一轮，让模型自我修正
    Observe(String),
    /// 终止当前会话
    Abort,
}
