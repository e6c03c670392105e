//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete：
//! 输入对话快照、system prompt 与可选的函数定义，返回纯文本或原生函数调用。

use async_trait::async_trait;

use crate::memory::Message;
use crate::tools::FunctionSchema;

/// 一次补全的结果：纯文本（可能内嵌 JSON 指令）或原生函数调用
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    FunctionCall {
        name: String,
        arguments_json: String,
    },
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Completion::Text(content.into())
    }

    pub fn function_call(name: impl Into<String>, arguments_json: impl Into<String>) -> Self {
        Completion::FunctionCall {
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }

    /// 写入对话窗口时使用的文本形式
    pub fn as_transcript(&self) -> String {
        match self {
            Completion::Text(t) => t.clone(),
            Completion::FunctionCall {
                name,
                arguments_json,
            } => format!("function_call {name}({arguments_json})"),
        }
    }
}

/// 补全后端：失败时返回错误字符串，由调用方映射为 BackendUnavailable
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        system_prompt: &str,
        functions: Option<&[FunctionSchema]>,
    ) -> Result<Completion, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
