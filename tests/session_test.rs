//! 会话集成测试：脚本化后端 + 哈希嵌入，覆盖完整的规划 → 行动 → 反思流程

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use scout::llm::{Completion, EmbeddingProvider, HashingEmbedder, ScriptedLlmClient};
    use scout::memory::{MemoryStore, TimeMode};
    use scout::observability::FlowGraphSink;
    use scout::tools::{CapabilityProvider, DateProvider, EchoProvider};
    use scout::{AgentError, LoopOptions, LoopState, OrchestrationLoop, SessionOutcome, StepOutcome};

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
            Err("embedding service down".to_string())
        }
    }

    fn date_provider() -> Arc<dyn CapabilityProvider> {
        let moment = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap();
        Arc::new(DateProvider::at(moment))
    }

    fn echo() -> Arc<dyn CapabilityProvider> {
        Arc::new(EchoProvider::new())
    }

    fn options(reflect: bool) -> LoopOptions {
        LoopOptions {
            reflect,
            ..Default::default()
        }
    }

    fn session(
        llm: Arc<ScriptedLlmClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        catalogue: Vec<Arc<dyn CapabilityProvider>>,
        reflect: bool,
    ) -> OrchestrationLoop {
        OrchestrationLoop::new(llm, MemoryStore::new(embedder, TimeMode::Logical), catalogue)
            .with_options(options(reflect))
    }

    #[tokio::test]
    async fn test_date_objective_end_to_end() {
        let llm = Arc::new(ScriptedLlmClient::from_texts([
            "1. Ask DateProvider for today's date.\n2. Report it.",
            r#"{"action": "DateProvider", "input": {}}"#,
            r#"{"action": "complete", "output": "2024-01-01"}"#,
        ]));
        let mut agent = session(
            llm.clone(),
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            false,
        );
        agent.initialize("What is today's date?").await.unwrap();
        let report = agent.run(Some(10)).await.unwrap();

        assert_eq!(agent.state(), LoopState::Stopped);
        assert_eq!(agent.final_output(), Some("2024-01-01"));
        assert_eq!(report.render(), "2024-01-01");
        assert_eq!(report.iterations, 2);

        let calls = llm.calls();
        assert_eq!(calls.len(), 3);
        let second_action = calls[2].last_user().unwrap();
        assert!(second_action.contains("2024-01-01"));
        assert!(second_action.contains("\"name\":\"DateProvider\""));
        // 窗口里保留了规划与两轮行动
        assert_eq!(agent.window().non_system_len(), 6);
    }

    #[tokio::test]
    async fn test_malformed_directive_is_fed_back() {
        let llm = Arc::new(ScriptedLlmClient::from_texts([
            "plan",
            "I think I should look at the calendar",
            r#"{"action": "complete", "output": "done"}"#,
        ]));
        let mut agent = session(
            llm.clone(),
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            false,
        );
        agent.initialize("What is today's date?").await.unwrap();

        assert_eq!(agent.step().await.unwrap(), StepOutcome::Continue);
        assert_eq!(agent.state(), LoopState::Running);
        assert!(agent.memory().is_empty());

        agent.step().await.unwrap();
        let prompt = llm.calls()[2].last_user().unwrap().to_string();
        let section = prompt
            .split("Previous tool output:\n")
            .nth(1)
            .unwrap();
        assert!(section.starts_with("Error: your previous reply could not be parsed"));
        assert!(section.contains("I think I should look at the calendar"));
    }

    #[tokio::test]
    async fn test_invalid_input_does_not_run_provider() {
        let llm = Arc::new(ScriptedLlmClient::from_texts([
            "plan",
            r#"{"action": "Echo", "input": {"txt": "hi"}}"#,
        ]));
        let mut agent = session(
            llm,
            Arc::new(HashingEmbedder::new(64)),
            vec![echo()],
            false,
        );
        agent.initialize("echo hi").await.unwrap();
        agent.step().await.unwrap();
        let observation = agent.previous_output().unwrap();
        assert!(observation.contains("missing [\"text\"]"));
        assert!(observation.contains("unexpected [\"txt\"]"));
        assert!(agent.memory().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_stops_session() {
        let llm = Arc::new(ScriptedLlmClient::from_texts(["plan"]));
        llm.push_failure("503 Service Unavailable");
        let mut agent = session(
            llm,
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            false,
        );
        agent.initialize("What is today's date?").await.unwrap();

        let err = agent.step().await.unwrap_err();
        assert!(matches!(err, AgentError::BackendUnavailable(_)));
        assert_eq!(agent.state(), LoopState::Stopped);
        assert!(matches!(
            agent.step().await.unwrap(),
            StepOutcome::Failed { ref error_kind, .. } if error_kind == "BackendUnavailable"
        ));

        let report = agent.report();
        assert!(!report.is_complete());
        let text = report.render();
        assert!(text.starts_with("Objective incomplete: \"What is today's date?\""));
        assert!(text.contains("BackendUnavailable"));
    }

    #[tokio::test]
    async fn test_backend_failure_during_planning() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push_failure("connection refused");
        let mut agent = session(
            llm,
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            false,
        );
        let err = agent.initialize("anything").await.unwrap_err();
        assert!(matches!(err, AgentError::BackendUnavailable(_)));
        assert_eq!(agent.state(), LoopState::Stopped);
        let report = agent.run(None).await.unwrap();
        assert!(matches!(report.outcome, SessionOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let llm = Arc::new(ScriptedLlmClient::from_texts([
            "plan",
            r#"{"action": "DateProvider", "input": {}}"#,
        ]));
        let mut agent = session(llm, Arc::new(FailingEmbedder), vec![date_provider()], false);
        agent.initialize("What is today's date?").await.unwrap();
        let err = agent.step().await.unwrap_err();
        assert!(matches!(err, AgentError::EmbeddingUnavailable(_)));
        assert_eq!(agent.state(), LoopState::Stopped);
        assert!(agent.memory().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_capability_fails_initialize() {
        let llm = Arc::new(ScriptedLlmClient::from_texts(["plan"]));
        let mut agent = session(
            llm.clone(),
            Arc::new(HashingEmbedder::new(64)),
            vec![echo(), echo()],
            false,
        );
        let err = agent.initialize("echo").await.unwrap_err();
        assert_eq!(err, AgentError::DuplicateCapability("Echo".to_string()));
        assert_eq!(agent.state(), LoopState::Stopped);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_native_function_call_directive() {
        let llm = Arc::new(ScriptedLlmClient::new([
            Completion::text("plan"),
            Completion::function_call("DateProvider", "{}"),
            Completion::function_call("complete", r#"{"output": "2024-01-01"}"#),
        ]));
        let mut agent = session(
            llm.clone(),
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            false,
        )
        .with_options(LoopOptions {
            reflect: false,
            native_function_calls: true,
            ..Default::default()
        });
        agent.initialize("What is today's date?").await.unwrap();
        let report = agent.run(None).await.unwrap();
        assert_eq!(report.render(), "2024-01-01");

        let calls = llm.calls();
        assert!(calls[0].function_names.is_none());
        let names = calls[1].function_names.clone().unwrap();
        assert_eq!(names, vec!["DateProvider".to_string(), "complete".to_string()]);
    }

    #[tokio::test]
    async fn test_reflection_populates_memory() {
        let llm = Arc::new(ScriptedLlmClient::from_texts([
            "plan",
            r#"{"action": "DateProvider", "input": {}}"#,
            "The current date is 2024-01-01.",
            r#"{"action": "complete", "output": "2024-01-01"}"#,
        ]));
        let mut agent = session(
            llm.clone(),
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            true,
        );
        agent.initialize("What is today's date?").await.unwrap();
        agent.run(None).await.unwrap();

        assert_eq!(agent.memory().len(), 1);
        assert_eq!(
            agent.memory().records()[0].content,
            "The current date is 2024-01-01."
        );
        let calls = llm.calls();
        let reflection = calls[2].last_user().unwrap();
        assert!(reflection.contains("you recently took the following action: DateProvider"));
        let next_action = calls[3].last_user().unwrap();
        assert!(next_action.contains("* The current date is 2024-01-01."));
    }

    #[tokio::test]
    async fn test_flow_graph_records_stages() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flow.json");
        let llm = Arc::new(ScriptedLlmClient::from_texts([
            "plan",
            r#"{"action": "DateProvider", "input": {}}"#,
            r#"{"action": "complete", "output": "2024-01-01"}"#,
        ]));
        let mut agent = session(
            llm,
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            false,
        )
        .with_sink(Arc::new(FlowGraphSink::new(path.clone())));
        agent.initialize("What is today's date?").await.unwrap();
        agent.run(None).await.unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let nodes = v["nodes"].as_array().unwrap();
        let titles: Vec<&str> = nodes
            .iter()
            .map(|n| n["data"]["title"].as_str().unwrap())
            .collect();
        assert_eq!(
            titles,
            vec!["Plan", "Action", "Observation", "Reflection", "Action", "Complete"]
        );
        assert_eq!(v["edges"].as_array().unwrap().len(), nodes.len() - 1);
    }

    #[tokio::test]
    async fn test_unparsed_action_stage_is_amended() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flow.json");
        let llm = Arc::new(ScriptedLlmClient::from_texts([
            "plan",
            "let me think about it",
            r#"{"action": "complete", "output": "done"}"#,
        ]));
        let mut agent = session(
            llm,
            Arc::new(HashingEmbedder::new(64)),
            vec![date_provider()],
            false,
        )
        .with_sink(Arc::new(FlowGraphSink::new(path.clone())));
        agent.initialize("What is today's date?").await.unwrap();
        agent.run(None).await.unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let titles: Vec<&str> = v["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["data"]["title"].as_str().unwrap())
            .collect();
        assert_eq!(
            titles,
            vec!["Plan", "Action (unparsed)", "Observation", "Action", "Complete"]
        );
        assert_eq!(v["nodes"][1]["data"]["content"], "let me think about it");
    }
}
