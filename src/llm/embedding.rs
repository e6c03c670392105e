//! 嵌入后端：供评分记忆使用
//!
//! OpenAiEmbedder 调用 OpenAI 兼容的 /embeddings 端点；HashingEmbedder 为离线确定性实现（词袋哈希），
//! 适合本地调试与测试。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

/// 默认嵌入模型
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// 嵌入提供方：将文本编码为定长向量；失败时返回错误字符串
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .ok_or_else(|| "empty embedding response".to_string())
    }
}

/// 离线嵌入：小写分词后哈希到固定维度并做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() % self.dimensions as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            v[self.bucket(&token.to_lowercase())] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }
}

/// 从应用配置创建嵌入提供方：provider 为 openai 且有 Key 时走 API，否则回退离线哈希嵌入
pub fn create_embedder_from_config(
    provider: &str,
    base_url: Option<&str>,
    model: &str,
    dimensions: usize,
) -> Arc<dyn EmbeddingProvider> {
    let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
    if provider.eq_ignore_ascii_case("openai") {
        if let Some(key) = key {
            tracing::info!("Using OpenAI embeddings ({})", model);
            return Arc::new(OpenAiEmbedder::new(base_url, model, Some(&key)));
        }
        tracing::warn!("embedding provider is openai but OPENAI_API_KEY is unset, using hashing embedder");
    }
    Arc::new(HashingEmbedder::new(dimensions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed("The quick brown fox").await.unwrap();
        let b = e.embed("the QUICK brown fox").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_embedder_empty_text_is_zero_vector() {
        let e = HashingEmbedder::default();
        let v = e.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
