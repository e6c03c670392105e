//! 短期记忆：有界对话窗口
//!
//! 保留最近 max_turns 条非 system 消息；超出时成对淘汰最旧的 user/assistant，保证角色交替不被破坏。

use serde::{Deserialize, Serialize};

/// 默认保留的非 system 消息条数
pub const DEFAULT_MAX_TURNS: usize = 10;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息（一个对话 turn）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 对话窗口：append 只追加；trim 在非 system 条数超过上限时成对淘汰
#[derive(Clone, Debug)]
pub struct ConversationWindow {
    messages: Vec<Message>,
    max_turns: usize,
}

impl Default for ConversationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationWindow {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    pub fn append(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// 追加一对 (prompt, response) 后立即 trim，主循环只通过这里写入，不会在一对中间剪枝
    pub fn append_exchange(&mut self, prompt: impl Into<String>, response: impl Into<String>) {
        self.append(Message::user(prompt));
        self.append(Message::assistant(response));
        self.trim();
    }

    /// 非 system 条数超过 max_turns 时，淘汰最旧的 user 及紧随其后的 assistant
    pub fn trim(&mut self) {
        while self.non_system_len() > self.max_turns {
            let Some(first) = self.messages.iter().position(|m| m.role != Role::System) else {
                break;
            };
            let paired = self.messages[first + 1..]
                .iter()
                .position(|m| m.role != Role::System)
                .map(|offset| first + 1 + offset)
                .filter(|&i| {
                    self.messages[first].role == Role::User
                        && self.messages[i].role == Role::Assistant
                });
            if let Some(second) = paired {
                self.messages.remove(second);
            }
            self.messages.remove(first);
        }
    }

    /// 只读副本，传给补全后端
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn non_system_len(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
