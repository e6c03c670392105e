//! 能力注册表
//!
//! 所有工具实现 CapabilityProvider（descriptor / validate_input / run），由 CapabilityRegistry
//! 按注册顺序保存、按名精确查找；dispatch 负责校验输入、施加可选超时、捕获 panic，
//! 并把任何失败统一转为 AgentError，不让故障越过这一层。每次调用输出结构化审计日志（JSON）。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::tools::schema::{
    complete_function_schema, CapabilityDescriptor, FunctionSchema, COMPLETE_ACTION,
};

pub type CapabilityInput = Map<String, Value>;
pub type CapabilityOutput = Map<String, Value>;

/// 能力提供方：描述不可变；每次调用的输入先校验，再按值交给 run，不在调用之间共享
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn descriptor(&self) -> &CapabilityDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// 默认按 input_schema 校验：缺少必填字段或出现未声明字段即失败
    fn validate_input(&self, input: &CapabilityInput) -> Result<(), AgentError> {
        validate_against_schema(self.descriptor(), input)
    }

    async fn run(&self, input: CapabilityInput) -> Result<CapabilityOutput, String>;
}

pub fn validate_against_schema(
    descriptor: &CapabilityDescriptor,
    input: &CapabilityInput,
) -> Result<(), AgentError> {
    let missing: Vec<String> = descriptor
        .required_inputs()
        .filter(|p| !input.contains_key(&p.name))
        .map(|p| p.name.clone())
        .collect();
    let extra: Vec<String> = input
        .keys()
        .filter(|k| !descriptor.input_schema.iter().any(|p| &p.name == *k))
        .cloned()
        .collect();
    if missing.is_empty() && extra.is_empty() {
        Ok(())
    } else {
        Err(AgentError::InvalidCapabilityInput {
            name: descriptor.name.clone(),
            missing,
            extra,
        })
    }
}

/// 能力注册表：有序，名称唯一
#[derive(Default)]
pub struct CapabilityRegistry {
    providers: Vec<Arc<dyn CapabilityProvider>>,
    index: HashMap<String, usize>,
    timeout: Option<Duration>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从固定的能力目录构建；重名即失败
    pub fn from_catalogue(catalogue: &[Arc<dyn CapabilityProvider>]) -> Result<Self, AgentError> {
        let mut registry = Self::new();
        for provider in catalogue {
            registry.register_arc(provider.clone())?;
        }
        Ok(registry)
    }

    /// 单次 dispatch 超时；None 表示不限
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(
        &mut self,
        provider: impl CapabilityProvider + 'static,
    ) -> Result<(), AgentError> {
        self.register_arc(Arc::new(provider))
    }

    pub fn register_arc(
        &mut self,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Result<(), AgentError> {
        let name = provider.name().to_string();
        // complete 是结束指令，同名能力永远不会被调度
        if name == COMPLETE_ACTION {
            return Err(AgentError::ConfigError(format!(
                "capability name '{}' is reserved",
                COMPLETE_ACTION
            )));
        }
        if self.index.contains_key(&name) {
            return Err(AgentError::DuplicateCapability(name));
        }
        self.index.insert(name, self.providers.len());
        self.providers.push(provider);
        Ok(())
    }

    /// 全部能力描述（注册顺序）
    pub fn describe_all(&self) -> Vec<CapabilityDescriptor> {
        self.providers
            .iter()
            .map(|p| p.descriptor().clone())
            .collect()
    }

    /// 原生 function calling 用的函数定义，末尾附加 complete
    pub fn function_schemas(&self) -> Vec<FunctionSchema> {
        let mut schemas: Vec<FunctionSchema> = self
            .providers
            .iter()
            .map(|p| p.descriptor().to_function_schema())
            .collect();
        schemas.push(complete_function_schema());
        schemas
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CapabilityProvider>, AgentError> {
        self.index
            .get(name)
            .map(|&i| self.providers[i].clone())
            .ok_or_else(|| AgentError::UnknownCapability(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 解析 → 校验 → 执行；校验失败时不会调用 run
    pub async fn dispatch(
        &self,
        name: &str,
        input: CapabilityInput,
    ) -> Result<CapabilityOutput, AgentError> {
        let provider = self.resolve(name)?;
        provider.validate_input(&input)?;

        let start = Instant::now();
        let args_preview = args_preview(&input);
        let run = AssertUnwindSafe(provider.run(input)).catch_unwind();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(r) => r.map_err(|p| format!("panicked: {}", panic_message(&*p))),
                Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
            }
            .and_then(|r| r),
            None => run
                .await
                .map_err(|p| format!("panicked: {}", panic_message(&*p)))
                .and_then(|r| r),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": name,
            "ok": result.is_ok(),
            "outcome": if result.is_ok() { "ok" } else { "error" },
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "dispatch");

        result.map_err(|cause| AgentError::CapabilityExecution {
            name: name.to_string(),
            cause,
        })
    }

    /// 并发执行多次 dispatch，结果顺序与提交顺序一致（与完成先后无关）
    pub async fn dispatch_batch(
        &self,
        calls: Vec<(String, CapabilityInput)>,
    ) -> Vec<Result<CapabilityOutput, AgentError>> {
        join_all(
            calls
                .into_iter()
                .map(|(name, input)| async move { self.dispatch(&name, input).await }),
        )
        .await
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn args_preview(args: &CapabilityInput) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
