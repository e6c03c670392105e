//! WebFetchMany 能力：并发抓取多个网页
//!
//! 内部持有一个只含 WebFetch 的注册表，通过 dispatch_batch 扇出；结果顺序与 urls 一致，
//! 单个页面失败只记录在该页的 error 字段，全部失败时整体报错。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::fetch::WebFetchProvider;
use crate::tools::schema::{CapabilityDescriptor, FieldSpec, ParamSpec, ParamType};
use crate::tools::{CapabilityInput, CapabilityOutput, CapabilityProvider, CapabilityRegistry};

const FETCH: &str = "WebFetch";

pub struct WebFetchManyProvider {
    descriptor: CapabilityDescriptor,
    inner: CapabilityRegistry,
    max_urls: usize,
}

impl WebFetchManyProvider {
    pub fn new(fetch: WebFetchProvider, max_urls: usize) -> Self {
        let mut inner = CapabilityRegistry::new();
        if let Err(e) = inner.register(fetch) {
            tracing::warn!("WebFetchMany inner registry: {}", e);
        }
        let max_urls = max_urls.max(1);
        Self {
            descriptor: CapabilityDescriptor::new(
                "WebFetchMany",
                format!(
                    "Fetches up to {} web pages from allowlisted domains in parallel and returns \
                     their readable text in the same order as the given URLs.",
                    max_urls
                ),
            )
            .input(ParamSpec::required("urls", ParamType::List, "The http(s) URLs to fetch"))
            .output(FieldSpec::new(
                "pages",
                ParamType::List,
                "One entry per URL with either content or error",
            )),
            inner,
            max_urls,
        }
    }
}

fn parse_urls(input: &CapabilityInput, max: usize) -> Result<Vec<String>, String> {
    let urls: Vec<String> = match input.get("urls") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| format!("urls must be strings, got {}", v))
            })
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(format!("urls must be a list, got {}", other)),
        None => return Err("Missing urls".to_string()),
    };
    if urls.is_empty() {
        return Err("urls is empty".to_string());
    }
    if urls.len() > max {
        return Err(format!("At most {} urls per call, got {}", max, urls.len()));
    }
    Ok(urls)
}

#[async_trait]
impl CapabilityProvider for WebFetchManyProvider {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: CapabilityInput) -> Result<CapabilityOutput, String> {
        let urls = parse_urls(&input, self.max_urls)?;
        tracing::info!(count = urls.len(), "web fetch many");

        let calls = urls
            .iter()
            .map(|url| {
                let mut args = CapabilityInput::new();
                args.insert("url".into(), Value::String(url.clone()));
                (FETCH.to_string(), args)
            })
            .collect();
        let results = self.inner.dispatch_batch(calls).await;

        let mut failures = 0;
        let pages: Vec<Value> = urls
            .iter()
            .zip(results)
            .map(|(url, result)| match result {
                Ok(mut out) => {
                    let content = out.remove("content").unwrap_or(Value::Null);
                    json!({"url": url, "content": content})
                }
                Err(e) => {
                    failures += 1;
                    json!({"url": url, "error": e.to_string()})
                }
            })
            .collect();
        if failures == pages.len() {
            let errors: Vec<String> = pages
                .iter()
                .filter_map(|p| p["error"].as_str().map(String::from))
                .collect();
            return Err(format!("All fetches failed: {}", errors.join("; ")));
        }

        let mut out = CapabilityOutput::new();
        out.insert("pages".into(), Value::Array(pages));
        Ok(out)
    }
}
