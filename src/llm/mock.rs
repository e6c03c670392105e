//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! ScriptedLlmClient 按顺序返回预设的补全，并记录每次收到的消息，便于断言 prompt 内容；
//! 脚本耗尽后返回 fallback（默认直接 complete，避免离线运行死循环）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{Completion, LlmClient};
use crate::memory::Message;
use crate::tools::FunctionSchema;

/// 一次调用的记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub function_names: Option<Vec<String>>,
}

impl RecordedCall {
    /// 本次调用的最后一条 user 消息（即新 prompt）
    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::memory::Role::User))
            .map(|m| m.content.as_str())
    }
}

/// 脚本化客户端：每次 complete 弹出一条预设回复
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Completion, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
    fallback: Completion,
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new(Vec::<Completion>::new())
    }
}

impl ScriptedLlmClient {
    pub fn new(script: impl IntoIterator<Item = Completion>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
            fallback: Completion::text(
                r#"{"action": "complete", "output": "Mock backend has no further actions."}"#,
            ),
        }
    }

    /// 便捷构造：全部为文本回复
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Completion::Text(t.into())))
    }

    /// 追加一次失败（模拟后端不可用）
    pub fn push_failure(&self, err: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err.into()));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        system_prompt: &str,
        functions: Option<&[FunctionSchema]>,
    ) -> Result<Completion, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                messages: messages.to_vec(),
                function_names: functions.map(|f| f.iter().map(|s| s.name.clone()).collect()),
            });
        }
        let next = self
            .script
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}
