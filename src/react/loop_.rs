//! 编排主循环
//!
//! NotStarted → Initializing → Running → Stopped，单向流转。
//! initialize：构建能力注册表、生成初始计划；step：检索记忆 → 行动 prompt → 解析指令 → 执行能力 → 反思写入记忆；
//! 可恢复错误作为下一轮的「上一步工具输出」，补全 / 嵌入后端错误终止会话。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{
    AgentError, LoopState, RecoveryAction, RecoveryEngine, SessionOutcome, SessionReport,
    StepOutcome,
};
use crate::llm::{Completion, LlmClient};
use crate::memory::{ConversationWindow, FixedImportance, ImportanceRater, MemoryStore, Message};
use crate::observability::{NoopSink, StageSink};
use crate::react::directive::{parse_completion, ActionDirective};
use crate::react::prompts::{
    action_prompt, planning_prompt, reflection_prompt, truncate_chars, ActionPromptParts,
    SYSTEM_PROMPT,
};
use crate::tools::{
    directive_schema_json, render_descriptors, CapabilityProvider, CapabilityRegistry,
};

/// 日志中 prompt / 回复预览的最大字符数
const PREVIEW_CHARS: usize = 200;

/// 规划 / 行动前的记忆检索方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// 相关度 + 新近度 + 重要度综合评分
    #[default]
    Composite,
    /// 仅按时间倒序
    Recent,
    /// 不检索
    Off,
}

/// 主循环选项
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub retrieval: RetrievalMode,
    pub top_k: usize,
    /// 是否调用模型总结工具输出；关闭时写入截断后的原始输出
    pub reflect: bool,
    pub reflection_max_chars: usize,
    /// 是否把能力清单作为原生函数定义传给后端
    pub native_function_calls: bool,
    /// 单次能力执行超时；None 表示不限
    pub tool_timeout: Option<Duration>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            retrieval: RetrievalMode::Composite,
            top_k: 100,
            reflect: true,
            reflection_max_chars: 4000,
            native_function_calls: false,
            tool_timeout: None,
        }
    }
}

/// 一次会话的编排主循环；独占自己的记忆库、对话窗口与能力注册表
pub struct OrchestrationLoop {
    session_id: String,
    catalogue: Vec<Arc<dyn CapabilityProvider>>,
    registry: CapabilityRegistry,
    llm: Arc<dyn LlmClient>,
    memory: MemoryStore,
    window: ConversationWindow,
    rater: Arc<dyn ImportanceRater>,
    sink: Arc<dyn StageSink>,
    recovery: RecoveryEngine,
    cancel_token: CancellationToken,
    options: LoopOptions,
    state: LoopState,
    objective: String,
    plan: String,
    capability_prompt: String,
    directive_schema: String,
    previous_output: Option<String>,
    iterations: usize,
    outcome: Option<SessionOutcome>,
}

impl OrchestrationLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        memory: MemoryStore,
        catalogue: Vec<Arc<dyn CapabilityProvider>>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            catalogue,
            registry: CapabilityRegistry::new(),
            llm,
            memory,
            window: ConversationWindow::default(),
            rater: Arc::new(FixedImportance::default()),
            sink: Arc::new(NoopSink::default()),
            recovery: RecoveryEngine::new(),
            cancel_token: CancellationToken::new(),
            options: LoopOptions::default(),
            state: LoopState::NotStarted,
            objective: String::new(),
            plan: String::new(),
            capability_prompt: String::new(),
            directive_schema: String::new(),
            previous_output: None,
            iterations: 0,
            outcome: None,
        }
    }

    pub fn with_window(mut self, window: ConversationWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_rater(mut self, rater: Arc<dyn ImportanceRater>) -> Self {
        self.rater = rater;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StageSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// 下一轮 prompt 中的「上一步工具输出」
    pub fn previous_output(&self) -> Option<&str> {
        self.previous_output.as_deref()
    }

    pub fn final_output(&self) -> Option<&str> {
        match &self.outcome {
            Some(SessionOutcome::Completed { output }) => Some(output),
            _ => None,
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn window(&self) -> &ConversationWindow {
        &self.window
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// 补全后端累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 供其他任务协作式取消本会话
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 致命错误：进入 Stopped 并记录结果
    fn fail(&mut self, err: AgentError) -> AgentError {
        tracing::error!(
            session = %self.session_id,
            kind = err.kind(),
            error = %err,
            "session stopped"
        );
        self.state = LoopState::Stopped;
        self.outcome = Some(SessionOutcome::Failed {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        });
        err
    }

    /// 可恢复错误转为下一轮的 Observation；否则终止
    fn observe_error(&mut self, err: AgentError) -> Result<(), AgentError> {
        match self.recovery.handle(&err) {
            RecoveryAction::Observe(text) => {
                tracing::warn!(kind = err.kind(), error = %err, "recoverable error fed back");
                self.sink.add_stage("Observation", &text);
                self.previous_output = Some(text);
                Ok(())
            }
            RecoveryAction::Abort => Err(self.fail(err)),
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        with_history: bool,
        native: bool,
    ) -> Result<Completion, AgentError> {
        let mut messages = if with_history {
            self.window.snapshot()
        } else {
            Vec::new()
        };
        messages.push(Message::user(prompt.to_string()));
        let functions = native.then(|| self.registry.function_schemas());
        tracing::debug!(prompt = %truncate_chars(prompt, PREVIEW_CHARS), "completion request");
        let completion = self
            .llm
            .complete(&messages, SYSTEM_PROMPT, functions.as_deref())
            .await
            .map_err(AgentError::BackendUnavailable)?;
        tracing::debug!(
            response = %truncate_chars(&completion.as_transcript(), PREVIEW_CHARS),
            "completion response"
        );
        Ok(completion)
    }

    /// 按配置的检索方式取记忆；记忆库为空时不调用嵌入后端
    async fn retrieve(&self, query: &str) -> Result<Vec<String>, AgentError> {
        if self.memory.is_empty() {
            return Ok(Vec::new());
        }
        match self.options.retrieval {
            RetrievalMode::Composite => self.memory.query(query, self.options.top_k).await,
            RetrievalMode::Recent => Ok(self.memory.query_recent(self.options.top_k)),
            RetrievalMode::Off => Ok(Vec::new()),
        }
    }

    /// 构建注册表并生成初始计划；仅允许在 NotStarted 调用
    pub async fn initialize(&mut self, objective: impl Into<String>) -> Result<(), AgentError> {
        if self.state != LoopState::NotStarted {
            return Err(AgentError::InvalidState(format!(
                "initialize called in {:?}",
                self.state
            )));
        }
        self.state = LoopState::Initializing;
        self.objective = objective.into();
        tracing::info!(session = %self.session_id, objective = %self.objective, "initializing");

        let registry = match CapabilityRegistry::from_catalogue(&self.catalogue) {
            Ok(r) => r.with_timeout(self.options.tool_timeout),
            Err(e) => return Err(self.fail(e)),
        };
        self.registry = registry;
        self.capability_prompt = render_descriptors(&self.registry.describe_all());
        self.directive_schema = directive_schema_json();

        let memories = match self.retrieve(&self.objective).await {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e)),
        };
        let prompt = planning_prompt(&self.objective, &self.capability_prompt, &memories);
        let plan = match self.complete(&prompt, true, false).await {
            Ok(c) => c.as_transcript(),
            Err(e) => return Err(self.fail(e)),
        };
        self.sink.add_stage("Plan", &plan);
        self.window.append_exchange(prompt, plan.clone());
        self.plan = plan;
        self.state = LoopState::Running;
        tracing::info!(
            session = %self.session_id,
            capabilities = self.registry.len(),
            "session running"
        );
        Ok(())
    }

    /// Stopped 状态下再次调用 step 时返回的结果
    fn stopped_outcome(&self) -> StepOutcome {
        match &self.outcome {
            Some(SessionOutcome::Completed { output }) => StepOutcome::Completed(output.clone()),
            Some(SessionOutcome::Failed {
                error_kind,
                message,
            }) => StepOutcome::Failed {
                error_kind: error_kind.clone(),
                message: message.clone(),
            },
            _ => StepOutcome::Cancelled,
        }
    }

    /// 执行一轮 Running 迭代
    pub async fn step(&mut self) -> Result<StepOutcome, AgentError> {
        match self.state {
            LoopState::Running => {}
            LoopState::Stopped => return Ok(self.stopped_outcome()),
            other => {
                return Err(AgentError::InvalidState(format!(
                    "step called in {:?}",
                    other
                )))
            }
        }
        if self.cancel_token.is_cancelled() {
            self.mark_cancelled();
            return Ok(StepOutcome::Cancelled);
        }
        self.iterations += 1;

        let query = match &self.previous_output {
            Some(prev) => format!("{}\n{}", self.objective, prev),
            None => self.objective.clone(),
        };
        let memories = match self.retrieve(&query).await {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e)),
        };
        let prompt = action_prompt(&ActionPromptParts {
            objective: &self.objective,
            plan: &self.plan,
            memories: &memories,
            previous_output: self.previous_output.as_deref(),
            capabilities: &self.capability_prompt,
            directive_schema: &self.directive_schema,
        });

        let completion = match self
            .complete(&prompt, true, self.options.native_function_calls)
            .await
        {
            Ok(c) => c,
            Err(e) => return Err(self.fail(e)),
        };
        let response = completion.as_transcript();
        let action_stage = self.sink.add_stage("Action", &response);

        let directive = match parse_completion(&completion) {
            Ok(d) => d,
            Err(e) => {
                self.sink.amend_stage(action_stage, Some("Action (unparsed)"), None);
                self.observe_error(e)?;
                self.window.append_exchange(prompt, response);
                return Ok(StepOutcome::Continue);
            }
        };

        match directive {
            ActionDirective::Complete { output } => {
                self.window.append_exchange(prompt, response);
                self.sink.add_stage("Complete", &output);
                tracing::info!(
                    session = %self.session_id,
                    iterations = self.iterations,
                    "objective complete"
                );
                self.state = LoopState::Stopped;
                self.outcome = Some(SessionOutcome::Completed {
                    output: output.clone(),
                });
                Ok(StepOutcome::Completed(output))
            }
            ActionDirective::Invoke { action, input } => {
                let input_json = Value::Object(input.clone()).to_string();
                tracing::info!(action = %action, input = %input_json, "dispatching");
                match self.registry.dispatch(&action, input).await {
                    Ok(out) => {
                        let output = Value::Object(out).to_string();
                        self.sink.add_stage("Observation", &output);
                        self.previous_output = Some(output.clone());
                        if let Err(e) = self.reflect(&action, &input_json, &output).await {
                            return Err(self.fail(e));
                        }
                    }
                    Err(e) => self.observe_error(e)?,
                }
                self.window.append_exchange(prompt, response);
                Ok(StepOutcome::Continue)
            }
        }
    }

    /// 总结工具输出、评分并写入长期记忆
    async fn reflect(
        &mut self,
        action: &str,
        input_json: &str,
        output: &str,
    ) -> Result<(), AgentError> {
        let excerpt = truncate_chars(output, self.options.reflection_max_chars);
        let content = if self.options.reflect {
            let prompt = reflection_prompt(&self.objective, action, input_json, &excerpt);
            self.complete(&prompt, false, false).await?.as_transcript()
        } else {
            format!("{} returned: {}", action, excerpt)
        };
        let importance = self.rater.rate(&self.objective, &content).await?;
        let id = self.memory.append(content.clone(), importance).await?;
        self.sink.add_stage("Reflection", &content);
        tracing::debug!(id = %id, importance, "reflection stored");
        Ok(())
    }

    fn mark_cancelled(&mut self) {
        tracing::info!(session = %self.session_id, "session cancelled");
        self.state = LoopState::Stopped;
        self.outcome = Some(SessionOutcome::Cancelled);
    }

    /// 协作式停止：不打断进行中的调用，下一次 step 前生效
    pub fn stop(&mut self) {
        self.cancel_token.cancel();
        if !self.state.is_terminal() {
            self.mark_cancelled();
        }
    }

    /// 反复 step 直到 Stopped、致命错误、取消或达到 max_iterations（本次 run 内的轮数）
    pub async fn run(
        &mut self,
        max_iterations: Option<usize>,
    ) -> Result<SessionReport, AgentError> {
        if matches!(self.state, LoopState::NotStarted | LoopState::Initializing) {
            return Err(AgentError::InvalidState(format!(
                "run called in {:?}",
                self.state
            )));
        }
        let mut steps = 0;
        while self.state == LoopState::Running {
            if max_iterations.is_some_and(|max| steps >= max) {
                tracing::warn!(session = %self.session_id, steps, "iteration limit reached");
                return Ok(self.report());
            }
            steps += 1;
            if self.step().await.is_err() {
                break;
            }
        }
        Ok(self.report())
    }

    /// 当前会话报告；尚未结束时视为达到迭代上限
    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session_id.clone(),
            objective: self.objective.clone(),
            iterations: self.iterations,
            outcome: self
                .outcome
                .clone()
                .unwrap_or(SessionOutcome::IterationLimit {
                    iterations: self.iterations,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{HashingEmbedder, ScriptedLlmClient};
    use crate::memory::TimeMode;
    use crate::tools::EchoProvider;

    fn build(script: &[&str], options: LoopOptions) -> (Arc<ScriptedLlmClient>, OrchestrationLoop) {
        let llm = Arc::new(ScriptedLlmClient::from_texts(script.iter().copied()));
        let memory = MemoryStore::new(Arc::new(HashingEmbedder::new(64)), TimeMode::Logical);
        let catalogue: Vec<Arc<dyn CapabilityProvider>> = vec![Arc::new(EchoProvider::new())];
        let agent = OrchestrationLoop::new(llm.clone(), memory, catalogue).with_options(options);
        (llm, agent)
    }

    fn no_reflect() -> LoopOptions {
        LoopOptions {
            reflect: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_step_before_initialize_is_invalid() {
        let (_, mut agent) = build(&[], no_reflect());
        assert_eq!(agent.state(), LoopState::NotStarted);
        let err = agent.step().await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidState(_)));
        assert!(matches!(agent.run(None).await, Err(AgentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_initialize_twice_is_invalid() {
        let (_, mut agent) = build(&["plan"], no_reflect());
        agent.initialize("say hi").await.unwrap();
        assert_eq!(agent.state(), LoopState::Running);
        assert_eq!(agent.plan(), "plan");
        assert!(matches!(
            agent.initialize("again").await,
            Err(AgentError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_capability_becomes_observation() {
        let (llm, mut agent) = build(
            &[
                "plan",
                r#"{"action": "Teleport", "input": {}}"#,
                r#"{"action": "complete", "output": "done"}"#,
            ],
            no_reflect(),
        );
        agent.initialize("go").await.unwrap();
        assert_eq!(agent.step().await.unwrap(), StepOutcome::Continue);
        assert!(agent.previous_output().unwrap().contains("Teleport"));
        assert_eq!(
            agent.step().await.unwrap(),
            StepOutcome::Completed("done".to_string())
        );
        let calls = llm.calls();
        assert!(calls[2].last_user().unwrap().contains("no capability named 'Teleport'"));
    }

    #[tokio::test]
    async fn test_dispatch_output_feeds_next_prompt_and_memory() {
        let (llm, mut agent) = build(
            &[
                "plan",
                r#"{"action": "Echo", "input": {"text": "hello"}}"#,
                r#"{"action": "complete", "output": "hello"}"#,
            ],
            no_reflect(),
        );
        agent.initialize("echo hello").await.unwrap();
        agent.step().await.unwrap();
        assert_eq!(agent.memory().len(), 1);
        assert!(agent.memory().records()[0].content.starts_with("Echo returned:"));
        agent.step().await.unwrap();
        let prompt = llm.calls()[2].last_user().unwrap().to_string();
        assert!(prompt.contains("Previous tool output:\n{\"text\":\"hello\"}"));
        assert!(prompt.contains("relevant memories"));
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let (_, mut agent) = build(&["plan"], no_reflect());
        agent.initialize("go").await.unwrap();
        agent.stop();
        assert_eq!(agent.state(), LoopState::Stopped);
        assert_eq!(agent.step().await.unwrap(), StepOutcome::Cancelled);
        assert_eq!(agent.run(None).await.unwrap().outcome, SessionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_token_checked_between_iterations() {
        let (_, mut agent) = build(&["plan"], no_reflect());
        let token = agent.cancel_token();
        agent.initialize("go").await.unwrap();
        token.cancel();
        assert_eq!(agent.step().await.unwrap(), StepOutcome::Cancelled);
        assert_eq!(agent.state(), LoopState::Stopped);
        assert_eq!(agent.iterations(), 0);
    }

    #[tokio::test]
    async fn test_iteration_limit_keeps_running() {
        let (_, mut agent) = build(&["plan", "no json", "still no json"], no_reflect());
        agent.initialize("go").await.unwrap();
        let report = agent.run(Some(2)).await.unwrap();
        assert_eq!(report.outcome, SessionOutcome::IterationLimit { iterations: 2 });
        assert_eq!(agent.state(), LoopState::Running);
    }
}
