//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，如 `SCOUT__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;
use crate::memory::TimeMode;
use crate::react::RetrievalMode;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
    pub conversation: ConversationSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、迭代上限、流程图输出
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 主循环最大迭代数；0 表示不限
    pub max_iterations: usize,
    /// 设置后把各阶段写成流程图 JSON
    pub visualizer_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "scout".to_string(),
            max_iterations: 25,
            visualizer_path: None,
        }
    }
}

/// [llm] 段：补全后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// deepseek / openai / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub native_function_calls: bool,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            native_function_calls: true,
            request_timeout_secs: 60,
        }
    }
}

/// [embedding] 段：嵌入后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    /// openai / hashing
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 仅 hashing 使用
    pub dimensions: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: crate::llm::DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: None,
            dimensions: 256,
        }
    }
}

/// [memory] 段：长期记忆的时间模式、检索与反思
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub time_mode: TimeMode,
    pub retrieval: RetrievalMode,
    pub top_k: usize,
    pub decay_rate: f64,
    /// 写入记忆前是否让模型总结工具输出
    pub reflect: bool,
    pub reflection_max_chars: usize,
    /// 是否让模型给记忆打重要度；关闭时使用 default_importance
    pub rate_importance: bool,
    pub default_importance: u8,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            time_mode: TimeMode::Logical,
            retrieval: RetrievalMode::Composite,
            top_k: 100,
            decay_rate: crate::memory::long_term::DEFAULT_DECAY_RATE,
            reflect: true,
            reflection_max_chars: 4000,
            rate_importance: true,
            default_importance: crate::memory::DEFAULT_IMPORTANCE,
        }
    }
}

/// [conversation] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationSection {
    pub max_turns: usize,
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            max_turns: crate::memory::DEFAULT_MAX_TURNS,
        }
    }
}

/// [tools] 段：能力超时、Terminal 白名单、WebFetch 域名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次能力执行超时（秒）；0 表示不限
    pub tool_timeout_secs: u64,
    pub terminal: TerminalSection,
    pub fetch: FetchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            terminal: TerminalSection::default(),
            fetch: FetchSection::default(),
        }
    }
}

/// [tools.terminal] 段：允许执行的命令名（仅首词）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    pub allowed_commands: Vec<String>,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            allowed_commands: ["ls", "grep", "cat", "head", "tail", "wc", "find", "date", "echo"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// [tools.fetch] 段：抓取超时、最大字符数、批量上限、域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    /// WebFetchMany 单次最多抓取的页面数
    pub max_urls: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            max_urls: 5,
            allowed_domains: [
                "en.wikipedia.org",
                "github.com",
                "raw.githubusercontent.com",
                "stackoverflow.com",
                "docs.rs",
                "crates.io",
                "doc.rust-lang.org",
                "developer.mozilla.org",
                "arxiv.org",
                "news.ycombinator.com",
                "www.wolframalpha.com",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("tools.terminal.allowed_commands")
            .with_list_parse_key("tools.fetch.allowed_domains"),
    );

    builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| AgentError::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.conversation.max_turns, 10);
        assert_eq!(cfg.memory.time_mode, TimeMode::Logical);
        assert!((cfg.memory.decay_rate - 0.01).abs() < 1e-9);
        assert!(cfg.tools.terminal.allowed_commands.contains(&"ls".to_string()));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scout.toml");
        std::fs::write(
            &path,
            r#"
[app]
max_iterations = 3

[memory]
time_mode = "wall_clock"
retrieval = "recent"
top_k = 5

[tools.fetch]
allowed_domains = ["example.com"]
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.app.max_iterations, 3);
        assert_eq!(cfg.memory.time_mode, TimeMode::WallClock);
        assert_eq!(cfg.memory.retrieval, RetrievalMode::Recent);
        assert_eq!(cfg.memory.top_k, 5);
        assert_eq!(cfg.tools.fetch.allowed_domains, vec!["example.com".to_string()]);
        assert_eq!(cfg.tools.fetch.timeout_secs, 15);
        assert_eq!(cfg.conversation.max_turns, 10);
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[memory]\ntime_mode = \"sundial\"\n").unwrap();
        let err = load_config(Some(path)).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
