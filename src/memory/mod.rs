//! 记忆层：短期（有界对话窗口）、长期（带评分检索的记忆库）与重要度评分

pub mod conversation;
pub mod importance;
pub mod long_term;

pub use conversation::{ConversationWindow, Message, Role, DEFAULT_MAX_TURNS};
pub use importance::{FixedImportance, ImportanceRater, LlmImportanceRater, DEFAULT_IMPORTANCE};
pub use long_term::{cosine_similarity, MemoryRecord, MemoryStore, RecordId, TimeMode};
