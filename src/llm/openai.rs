//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；
//! 传入函数定义且启用原生函数调用时随请求附带 tools，优先返回 tool_calls 中的第一个函数调用。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionToolChoiceOption, ChatCompletionTools, CreateChatCompletionRequestArgs,
    FunctionObject, ToolChoiceOptions,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{Completion, LlmClient};
use crate::memory::{Message, Role};
use crate::tools::FunctionSchema;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 是否把函数定义随请求发送（后端不支持 tools 时关闭，退回文本指令）
    native_function_calls: bool,
    request_timeout: Duration,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let base_url = base_url
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            native_function_calls: true,
            request_timeout: Duration::from_secs(60),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_native_function_calls(mut self, enabled: bool) -> Self {
        self.native_function_calls = enabled;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs);
        self
    }

    fn to_openai_messages(
        &self,
        system_prompt: &str,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt.to_string())
                    .build()
                    .map_err(|e| e.to_string())?,
            ));
        }
        for m in messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
            };
            out.push(msg);
        }
        Ok(out)
    }

    async fn complete_chat(
        &self,
        messages: &[Message],
        system_prompt: &str,
        functions: Option<&[FunctionSchema]>,
    ) -> Result<Completion, String> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(self.to_openai_messages(system_prompt, messages)?);
        if let Some(functions) = functions {
            args.tools(to_openai_tools(functions))
                .tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto));
        }
        let request = args.build().map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .map(|c| completion_from_message(&c.message))
            .ok_or_else(|| "response has no choices".to_string())
    }
}

fn to_openai_tools(functions: &[FunctionSchema]) -> Vec<ChatCompletionTools> {
    functions
        .iter()
        .map(|f| {
            ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: f.name.clone(),
                    description: Some(f.description.clone()),
                    parameters: Some(f.parameters.clone()),
                    strict: None,
                },
            })
        })
        .collect()
}

/// 有 tool_calls 时取第一个函数调用，否则取 content
fn completion_from_message(message: &ChatCompletionResponseMessage) -> Completion {
    let first_call = message.tool_calls.iter().flatten().find_map(|call| match call {
        ChatCompletionMessageToolCalls::Function(f) => Some(&f.function),
        _ => None,
    });
    match first_call {
        Some(function) => {
            let arguments = if function.arguments.trim().is_empty() {
                "{}"
            } else {
                function.arguments.as_str()
            };
            Completion::function_call(function.name.as_str(), arguments)
        }
        None => Completion::Text(message.content.clone().unwrap_or_default()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        system_prompt: &str,
        functions: Option<&[FunctionSchema]>,
    ) -> Result<Completion, String> {
        let functions = functions.filter(|f| self.native_function_calls && !f.is_empty());
        let call = self.complete_chat(messages, system_prompt, functions);
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| format!("request timed out after {}s", self.request_timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(v: serde_json::Value) -> ChatCompletionResponseMessage {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_tool_call_preferred_over_content() {
        let m = message(json!({
            "role": "assistant",
            "content": "{\"action\": \"complete\", \"output\": \"ignored\"}",
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "DateProvider", "arguments": ""}
            }]
        }));
        assert_eq!(
            completion_from_message(&m),
            Completion::function_call("DateProvider", "{}")
        );
    }

    #[test]
    fn test_text_reply() {
        let m = message(json!({"role": "assistant", "content": "hello"}));
        assert_eq!(completion_from_message(&m), Completion::text("hello"));
        let empty = message(json!({"role": "assistant", "content": null}));
        assert_eq!(completion_from_message(&empty), Completion::text(""));
    }

    #[test]
    fn test_tools_carry_schema() {
        let tools = to_openai_tools(&[crate::tools::complete_function_schema()]);
        let v = serde_json::to_value(&tools).unwrap();
        assert_eq!(v[0]["type"], "function");
        assert_eq!(v[0]["function"]["name"], "complete");
        assert!(v[0]["function"]["parameters"].is_object());
    }
}
