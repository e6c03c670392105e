//! 核心层：错误与恢复、主循环状态与会话报告

pub mod error;
pub mod recovery;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::{LoopState, SessionOutcome, SessionReport, StepOutcome};
