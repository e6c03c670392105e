//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供主循环决定是把错误喂回模型还是终止会话。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：可恢复错误转为带修正提示的 Observation，其余终止
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::DirectiveParse(raw) => RecoveryAction::Observe(format!(
                "Error: your previous reply could not be parsed as an action directive ({raw}). \
                Reply with exactly one JSON object: {{\"action\": \"<capability name>\", \"input\": {{...}}}} \
                or {{\"action\": \"complete\", \"output\": \"<final result>\"}}."
            )),
            AgentError::UnknownCapability(name) => RecoveryAction::Observe(format!(
                "Error: there is no capability named '{name}'. Use one of the listed capabilities, \
                matching the name exactly."
            )),
            AgentError::InvalidCapabilityInput { .. } => RecoveryAction::Observe(format!(
                "Error: {err}. Provide every required input field and nothing else."
            )),
            AgentError::CapabilityExecution { .. } => {
                RecoveryAction::Observe(format!("Error: {err}"))
            }
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_directive_parse_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::DirectiveParse("expected value at line 1".to_string());
        match engine.handle(&err) {
            RecoveryAction::Observe(msg) => {
                assert!(msg.contains("expected value at line 1"));
                assert!(msg.contains("\"action\""));
            }
            _ => panic!("Expected Observe"),
        }
    }

    #[test]
    fn test_recovery_unknown_capability() {
        let engine = RecoveryEngine::new();
        let err = AgentError::UnknownCapability("Teleport".to_string());
        match engine.handle(&err) {
            RecoveryAction::Observe(msg) => assert!(msg.contains("Teleport")),
            _ => panic!("Expected Observe"),
        }
    }

    #[test]
    fn test_recovery_invalid_input_lists_fields() {
        let engine = RecoveryEngine::new();
        let err = AgentError::InvalidCapabilityInput {
            name: "Echo".to_string(),
            missing: vec!["text".to_string()],
            extra: vec!["txt".to_string()],
        };
        match engine.handle(&err) {
            RecoveryAction::Observe(msg) => {
                assert!(msg.contains("text"));
                assert!(msg.contains("txt"));
            }
            _ => panic!("Expected Observe"),
        }
    }

    #[test]
    fn test_recovery_infrastructure_errors_abort() {
        let engine = RecoveryEngine::new();
        let backend = AgentError::BackendUnavailable("503".to_string());
        let embedding = AgentError::EmbeddingUnavailable("timeout".to_string());
        assert_eq!(engine.handle(&backend), RecoveryAction::Abort);
        assert_eq!(engine.handle(&embedding), RecoveryAction::Abort);
        assert!(!backend.is_recoverable());
        assert!(!embedding.is_recoverable());
    }

    #[test]
    fn test_error_kind_names() {
        let err = AgentError::CapabilityExecution {
            name: "Terminal".to_string(),
            cause: "exit 1".to_string(),
        };
        assert_eq!(err.kind(), "CapabilityExecutionError");
        assert!(err.is_recoverable());
        assert_eq!(
            AgentError::DuplicateCapability("Echo".into()).kind(),
            "DuplicateCapability"
        );
    }
}
