//! 认知层：指令解析、Prompt 模板与编排主循环

pub mod directive;
pub mod loop_;
pub mod prompts;

pub use directive::{parse_completion, ActionDirective};
pub use loop_::{LoopOptions, OrchestrationLoop, RetrievalMode};
