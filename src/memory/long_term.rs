//! 长期记忆：只追加的评分记忆库
//!
//! 每条记录带嵌入向量、时间戳、重要度（1-10）。检索支持三种方式：
//! - query_recent：按时间倒序
//! - query_relevance：按与查询的余弦相似度
//! - query：相关度 + 新近度 + 重要度 三列各自 min-max 归一化后求和
//!
//! 归一化每次都基于全部记录重新计算，新记录写入后同一查询的结果可能变化。

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::EmbeddingProvider;

/// 新近度衰减率：exp(-(now - timestamp) * (1 - 0.99))
pub const DEFAULT_DECAY_RATE: f64 = 1.0 - 0.99;

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 10;

/// 时间戳模式：每个记忆库实例只选一种，不混用
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// 逻辑计数器：第 n 条记录的时间戳为 n
    #[default]
    Logical,
    /// 墙钟秒数
    WallClock,
}

/// 记录 ID（插入序号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem-{}", self.0)
    }
}

/// 单条记忆，插入后不可变
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: RecordId,
    pub content: String,
    pub embedding: Vec<f32>,
    pub timestamp: f64,
    pub importance: u8,
}

type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

fn wall_clock_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// 评分记忆库：独占于一个会话，无内部锁
pub struct MemoryStore {
    records: Vec<MemoryRecord>,
    embedder: Arc<dyn EmbeddingProvider>,
    time_mode: TimeMode,
    /// 逻辑计数器，仅 Logical 模式使用
    counter: u64,
    decay_rate: f64,
    clock: Clock,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, time_mode: TimeMode) -> Self {
        Self {
            records: Vec::new(),
            embedder,
            time_mode,
            counter: 0,
            decay_rate: DEFAULT_DECAY_RATE,
            clock: Arc::new(wall_clock_secs),
        }
    }

    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    /// 替换墙钟来源（仅 WallClock 模式生效）
    pub fn with_clock(mut self, clock: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn time_mode(&self) -> TimeMode {
        self.time_mode
    }

    fn now(&self) -> f64 {
        match self.time_mode {
            TimeMode::Logical => self.counter as f64,
            TimeMode::WallClock => (self.clock)(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        self.embedder
            .embed(text)
            .await
            .map_err(AgentError::EmbeddingUnavailable)
    }

    /// 写入一条记忆；嵌入失败时不写入任何内容（计数器也不前进）
    pub async fn append(
        &mut self,
        content: impl Into<String>,
        importance: u8,
    ) -> Result<RecordId, AgentError> {
        let content = content.into();
        let embedding = self.embed(&content).await?;
        let timestamp = self.now();
        if self.time_mode == TimeMode::Logical {
            self.counter += 1;
        }
        let clamped = importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE);
        if clamped != importance {
            tracing::debug!(importance, clamped, "importance clamped into [1, 10]");
        }
        let id = RecordId(self.records.len() as u64);
        self.records.push(MemoryRecord {
            id,
            content,
            embedding,
            timestamp,
            importance: clamped,
        });
        tracing::debug!(id = %id, timestamp, importance = clamped, "memory appended");
        Ok(id)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// 最近 k 条，时间戳倒序；时间戳相同时后插入者在前
    pub fn query_recent(&self, k: usize) -> Vec<String> {
        let mut order: Vec<usize> = (0..self.records.len()).rev().collect();
        order.sort_by(|&a, &b| {
            self.records[b]
                .timestamp
                .total_cmp(&self.records[a].timestamp)
        });
        order
            .into_iter()
            .take(k)
            .map(|i| self.records[i].content.clone())
            .collect()
    }

    /// 与查询余弦相似度最高的 k 条
    pub async fn query_relevance(&self, query: &str, k: usize) -> Result<Vec<String>, AgentError> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query).await?;
        let scores: Vec<f64> = self
            .records
            .iter()
            .map(|r| cosine_similarity(&query_embedding, &r.embedding))
            .collect();
        Ok(self.top_k(&scores, k))
    }

    /// 综合评分检索：相关度、新近度、重要度各自归一化后求和，同分按插入顺序
    pub async fn query(&self, query: &str, k: usize) -> Result<Vec<String>, AgentError> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query).await?;
        let now = self.now();

        let relevance: Vec<f64> = self
            .records
            .iter()
            .map(|r| cosine_similarity(&query_embedding, &r.embedding))
            .collect();
        let recency: Vec<f64> = self
            .records
            .iter()
            .map(|r| (-(now - r.timestamp) * self.decay_rate).exp())
            .collect();
        let importance: Vec<f64> = self.records.iter().map(|r| r.importance as f64).collect();

        let relevance = min_max_normalize(&relevance);
        let recency = min_max_normalize(&recency);
        let importance = min_max_normalize(&importance);

        let combined: Vec<f64> = (0..self.records.len())
            .map(|i| relevance[i] + recency[i] + importance[i])
            .collect();
        Ok(self.top_k(&combined, k))
    }

    /// 按分数降序取前 k 条；sort_by 稳定，同分保持插入顺序
    fn top_k(&self, scores: &[f64], k: usize) -> Vec<String> {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order
            .into_iter()
            .take(k)
            .map(|i| self.records[i].content.clone())
            .collect()
    }
}

/// 将一列分数归一化到 [0, 1]；max == min 时整列取 0.5
fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == min {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// 余弦相似度；维度不一致或零向量时为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}
