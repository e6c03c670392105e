//! LLM 层：补全后端与嵌入后端（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{
    create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder,
    DEFAULT_EMBEDDING_MODEL,
};
pub use mock::{RecordedCall, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{Completion, LlmClient};
