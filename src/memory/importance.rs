//! 记忆重要度评分
//!
//! 由补全后端按「FORMAT: <rating>」格式给出 1–10 的重要度；解析失败回退为默认值。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::long_term::{MAX_IMPORTANCE, MIN_IMPORTANCE};
use crate::memory::Message;
use crate::react::prompts::importance_prompt;

/// 未能解析评分时使用的重要度
pub const DEFAULT_IMPORTANCE: u8 = 5;

#[async_trait]
pub trait ImportanceRater: Send + Sync {
    /// 针对目标 objective 给记忆内容打分，返回值落在 [1, 10]
    async fn rate(&self, objective: &str, content: &str) -> Result<u8, AgentError>;
}

/// 固定评分（不调用后端）
#[derive(Debug, Clone, Copy)]
pub struct FixedImportance(pub u8);

impl Default for FixedImportance {
    fn default() -> Self {
        Self(DEFAULT_IMPORTANCE)
    }
}

#[async_trait]
impl ImportanceRater for FixedImportance {
    async fn rate(&self, _objective: &str, _content: &str) -> Result<u8, AgentError> {
        Ok(self.0.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE))
    }
}

static FORMAT_RE: OnceLock<Regex> = OnceLock::new();
static NUMBER_RE: OnceLock<Regex> = OnceLock::new();

/// 优先取 FORMAT: 后的数字，否则取第一个整数
fn parse_rating(reply: &str) -> Option<u8> {
    let format_re = FORMAT_RE.get_or_init(|| Regex::new(r"(?i)FORMAT:\s*(\d+)").unwrap());
    let number_re = NUMBER_RE.get_or_init(|| Regex::new(r"\d+").unwrap());
    let digits = format_re
        .captures(reply)
        .and_then(|c| c.get(1))
        .or_else(|| number_re.find(reply))?;
    let value: u64 = digits.as_str().parse().ok()?;
    Some(value.clamp(MIN_IMPORTANCE as u64, MAX_IMPORTANCE as u64) as u8)
}

/// 基于补全后端的评分
pub struct LlmImportanceRater {
    llm: Arc<dyn LlmClient>,
    fallback: u8,
}

impl LlmImportanceRater {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            fallback: DEFAULT_IMPORTANCE,
        }
    }

    pub fn with_fallback(mut self, importance: u8) -> Self {
        self.fallback = importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE);
        self
    }
}

#[async_trait]
impl ImportanceRater for LlmImportanceRater {
    async fn rate(&self, objective: &str, content: &str) -> Result<u8, AgentError> {
        let prompt = importance_prompt(objective, content);
        let reply = self
            .llm
            .complete(&[Message::user(prompt)], "", None)
            .await
            .map_err(AgentError::BackendUnavailable)?
            .as_transcript();
        match parse_rating(&reply) {
            Some(rating) => Ok(rating),
            None => {
                tracing::warn!(
                    reply = %reply,
                    fallback = self.fallback,
                    "importance rating unparseable"
                );
                Ok(self.fallback)
            }
        }
    }
}
