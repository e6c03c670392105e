//! 会话装配：根据配置创建补全后端、嵌入后端、能力清单与编排主循环

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::llm::{
    create_deepseek_client, create_embedder_from_config, EmbeddingProvider, LlmClient,
    OpenAiClient, ScriptedLlmClient, DEEPSEEK_CHAT,
};
use crate::memory::{
    ConversationWindow, FixedImportance, ImportanceRater, LlmImportanceRater, MemoryStore,
};
use crate::observability::{FlowGraphSink, StageSink};
use crate::react::{LoopOptions, OrchestrationLoop};
use crate::tools::{
    CapabilityProvider, DateProvider, TerminalProvider, WebFetchManyProvider, WebFetchProvider,
};

/// 根据配置与环境变量选择补全后端；没有可用 Key 时退回脚本化 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    if provider == "mock" {
        tracing::info!("Using scripted mock LLM");
        return Arc::new(ScriptedLlmClient::default());
    }
    if provider == "deepseek" && (has_deepseek_key || openai_key.is_some()) {
        let model = cfg.llm.model.clone().unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
        tracing::info!("Using DeepSeek LLM ({})", model);
        let client = create_deepseek_client(Some(&model))
            .with_request_timeout(cfg.llm.request_timeout_secs);
        return Arc::new(if cfg.llm.native_function_calls {
            client
        } else {
            client.with_native_function_calls(false)
        });
    }
    if let Some(key) = openai_key.filter(|_| provider == "openai") {
        let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        return Arc::new(
            OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, Some(&key))
                .with_native_function_calls(cfg.llm.native_function_calls)
                .with_request_timeout(cfg.llm.request_timeout_secs),
        );
    }
    tracing::warn!("No API key set or provider unknown, using scripted mock LLM");
    Arc::new(ScriptedLlmClient::default())
}

pub fn create_embedder(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    create_embedder_from_config(
        &cfg.embedding.provider,
        cfg.embedding.base_url.as_deref(),
        &cfg.embedding.model,
        cfg.embedding.dimensions,
    )
}

fn web_fetch(cfg: &AppConfig) -> WebFetchProvider {
    WebFetchProvider::new(
        cfg.tools.fetch.allowed_domains.clone(),
        cfg.tools.fetch.timeout_secs,
        cfg.tools.fetch.max_result_chars,
    )
}

/// 内置能力清单：DateProvider、WebFetch、WebFetchMany、Terminal
pub fn default_catalogue(cfg: &AppConfig) -> Vec<Arc<dyn CapabilityProvider>> {
    vec![
        Arc::new(DateProvider::new()),
        Arc::new(web_fetch(cfg)),
        Arc::new(WebFetchManyProvider::new(web_fetch(cfg), cfg.tools.fetch.max_urls)),
        Arc::new(TerminalProvider::new(
            cfg.tools.terminal.allowed_commands.clone(),
            terminal_timeout_secs(cfg),
        )),
    ]
}

/// Terminal 自身的超时：未配置能力超时时给一个上限
fn terminal_timeout_secs(cfg: &AppConfig) -> u64 {
    match cfg.tools.tool_timeout_secs {
        0 => 60,
        secs => secs,
    }
}

/// 按配置组装一个会话
pub fn create_session(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    catalogue: Vec<Arc<dyn CapabilityProvider>>,
) -> OrchestrationLoop {
    let memory =
        MemoryStore::new(embedder, cfg.memory.time_mode).with_decay_rate(cfg.memory.decay_rate);
    let rater: Arc<dyn ImportanceRater> = if cfg.memory.rate_importance {
        Arc::new(LlmImportanceRater::new(llm.clone()).with_fallback(cfg.memory.default_importance))
    } else {
        Arc::new(FixedImportance(cfg.memory.default_importance))
    };
    let options = LoopOptions {
        retrieval: cfg.memory.retrieval,
        top_k: cfg.memory.top_k,
        reflect: cfg.memory.reflect,
        reflection_max_chars: cfg.memory.reflection_max_chars,
        native_function_calls: cfg.llm.native_function_calls,
        tool_timeout: (cfg.tools.tool_timeout_secs > 0)
            .then(|| Duration::from_secs(cfg.tools.tool_timeout_secs)),
    };
    let mut session = OrchestrationLoop::new(llm, memory, catalogue)
        .with_window(ConversationWindow::new(cfg.conversation.max_turns))
        .with_rater(rater)
        .with_options(options);
    if let Some(path) = &cfg.app.visualizer_path {
        let sink: Arc<dyn StageSink> = Arc::new(FlowGraphSink::new(path.clone()));
        session = session.with_sink(sink);
    }
    session
}

/// 从配置创建完整会话（后端 + 内置能力）
pub fn create_session_from_config(cfg: &AppConfig) -> OrchestrationLoop {
    create_session(
        cfg,
        create_llm_from_config(cfg),
        create_embedder(cfg),
        default_catalogue(cfg),
    )
}
