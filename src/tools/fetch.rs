//! WebFetch 能力：抓取网页正文
//!
//! 仅允许配置中的域名，重定向的每一跳都重新校验；GET 请求带超时与 User-Agent；HTML 用 html2text 提取可读文本；
//! 超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::tools::schema::{CapabilityDescriptor, FieldSpec, ParamSpec, ParamType};
use crate::tools::{CapabilityInput, CapabilityOutput, CapabilityProvider};

const MAX_REDIRECTS: usize = 5;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub struct WebFetchProvider {
    descriptor: CapabilityDescriptor,
    /// 构建失败时为 None，抓取直接报错（不退回默认重定向策略）
    client: Option<Client>,
    allowed_domains: Arc<HashSet<String>>,
    max_result_chars: usize,
}

/// 判断内容是否像 HTML
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.contains('<') && (s.contains("</") || s.contains("<head")))
}

/// 解析 http(s) URL 并返回小写 host
fn parse_http_url(raw: &str) -> Result<(Url, String), String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("Invalid URL: {}", e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("Unsupported scheme: {}", url.scheme()));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "URL has no host".to_string())?
        .to_lowercase();
    Ok((url, host))
}

/// 校验一跳重定向：次数上限、scheme 与域名白名单
fn check_redirect(allowed: &HashSet<String>, target: &Url, hops: usize) -> Result<(), String> {
    if hops > MAX_REDIRECTS {
        return Err(format!("Too many redirects (>{})", MAX_REDIRECTS));
    }
    let (_, host) = parse_http_url(target.as_str())?;
    if allowed.contains(&host) {
        Ok(())
    } else {
        Err(format!("Redirect to domain not in allowlist: {}", host))
    }
}

fn redirect_policy(allowed: Arc<HashSet<String>>) -> Policy {
    Policy::custom(move |attempt| {
        match check_redirect(&allowed, attempt.url(), attempt.previous().len()) {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(e),
        }
    })
}

fn truncate_chars(body: String, max: usize) -> String {
    if body.chars().count() > max {
        body.chars().take(max).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

impl WebFetchProvider {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        let allowed_domains: Arc<HashSet<String>> =
            Arc::new(allowed_domains.into_iter().map(|s| s.to_lowercase()).collect());
        let client = Client::builder()
            .redirect(redirect_policy(allowed_domains.clone()))
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| tracing::warn!("web fetch client build failed: {}", e))
            .ok();
        Self {
            descriptor: CapabilityDescriptor::new(
                "WebFetch",
                "Fetches a web page from an allowlisted domain and returns its readable text.",
            )
            .input(ParamSpec::required("url", ParamType::String, "The http(s) URL to fetch"))
            .output(FieldSpec::new("content", ParamType::String, "Readable text of the page")),
            client,
            allowed_domains,
            max_result_chars,
        }
    }

    fn check_allowed(&self, raw: &str) -> Result<Url, String> {
        let (url, host) = parse_http_url(raw)?;
        if self.allowed_domains.contains(&host) {
            Ok(url)
        } else {
            Err(format!("Domain not in allowlist: {}", host))
        }
    }

    async fn fetch(&self, raw: &str) -> Result<String, String> {
        let url = self.check_allowed(raw)?;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| "HTTP client unavailable".to_string())?;
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            match from_read(body.as_bytes(), 120) {
                Ok(t) if !t.trim().is_empty() => t,
                _ => body.to_string(),
            }
        } else {
            body.to_string()
        };
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl CapabilityProvider for WebFetchProvider {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: CapabilityInput) -> Result<CapabilityOutput, String> {
        let url = input
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if url.is_empty() {
            return Err("Missing url".to_string());
        }
        tracing::info!(url = %url, "web fetch");
        let content = self.fetch(&url).await?;
        let mut out = CapabilityOutput::new();
        out.insert("content".into(), Value::String(content));
        Ok(out)
    }
}
