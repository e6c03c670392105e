//! 状态定义：主循环状态机与会话报告
//!
//! 状态单向流转：NotStarted → Initializing → Running → Stopped，不存在回到 Initializing 的重试路径。

use serde::Serialize;

/// 主循环状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum LoopState {
    #[default]
    NotStarted,
    Initializing,
    Running,
    Stopped,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped)
    }
}

/// 单步执行结果
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// 本轮已结束，需要继续下一轮
    Continue,
    /// 模型发出 complete，携带最终结果
    Completed(String),
    /// 已被外部取消（协作式）
    Cancelled,
    /// 会话此前因致命错误停止（Stopped 状态下再次调用 step 时返回）
    Failed { error_kind: String, message: String },
}

/// 会话最终结果
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// 正常完成：output 原样保留
    Completed { output: String },
    /// 致命错误导致目标未完成
    Failed { error_kind: String, message: String },
    /// 达到调用方设置的最大迭代数
    IterationLimit { iterations: usize },
    /// 协作式取消
    Cancelled,
}

/// 会话报告（供 CLI 等调用方渲染）
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub objective: String,
    pub iterations: usize,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Completed { .. })
    }

    /// 面向用户的一段文本：完成时原样输出 output，否则说明目标未完成及原因
    pub fn render(&self) -> String {
        match &self.outcome {
            SessionOutcome::Completed { output } => output.clone(),
            SessionOutcome::Failed {
                error_kind,
                message,
            } => format!(
                "Objective incomplete: \"{}\" ({}: {})",
                self.objective, error_kind, message
            ),
            SessionOutcome::IterationLimit { iterations } => format!(
                "Objective incomplete: \"{}\" (stopped after {} iterations)",
                self.objective, iterations
            ),
            SessionOutcome::Cancelled => {
                format!("Objective incomplete: \"{}\" (cancelled)", self.objective)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: SessionOutcome) -> SessionReport {
        SessionReport {
            session_id: "s1".to_string(),
            objective: "tell me today's date".to_string(),
            iterations: 2,
            outcome,
        }
    }

    #[test]
    fn test_render_completed_is_verbatim() {
        let r = report(SessionOutcome::Completed {
            output: "2024-01-01".to_string(),
        });
        assert!(r.is_complete());
        assert_eq!(r.render(), "2024-01-01");
    }

    #[test]
    fn test_render_failed_names_error_kind() {
        let r = report(SessionOutcome::Failed {
            error_kind: "BackendUnavailable".to_string(),
            message: "connection refused".to_string(),
        });
        assert!(!r.is_complete());
        let text = r.render();
        assert!(text.contains("incomplete"));
        assert!(text.contains("BackendUnavailable"));
        assert!(text.contains("tell me today's date"));
    }

    #[test]
    fn test_default_state() {
        assert_eq!(LoopState::default(), LoopState::NotStarted);
        assert!(LoopState::Stopped.is_terminal());
        assert!(!LoopState::Running.is_terminal());
    }
}
