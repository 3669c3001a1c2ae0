//! HTTP client for a remote tool server.
//!
//! Wire protocol:
//!
//! - `POST {base}/tools/call` with `{"name", "parameters"}` answers
//!   `{"success", "result", "error", "latency_ms"}`
//! - `POST {base}/tools/list` answers `{"tools": [...]}`
//! - `GET {base}/health`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use super::{
    ComplexityClassifier, ContextRetriever, LanguageModel, MediaAnalyzer, TemplateResponder,
};
use crate::error::{HlcsError, HlcsResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one remote tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub latency_ms: f64,
}

fn default_success() -> bool {
    true
}

impl ToolResult {
    fn failed(error: String, latency_ms: f64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            latency_ms,
        }
    }

    /// The result payload, or an `Upstream` error naming `tool`.
    pub fn into_result(self, tool: &str) -> HlcsResult<JsonValue> {
        if !self.success {
            return Err(HlcsError::upstream(
                tool,
                self.error.unwrap_or_else(|| "tool reported failure".into()),
            ));
        }
        self.result
            .ok_or_else(|| HlcsError::upstream(tool, "missing result"))
    }
}

#[derive(Serialize)]
struct ToolCall<'a> {
    name: &'a str,
    parameters: &'a JsonValue,
}

/// A remote tool server exposing classification, generation, retrieval
/// and media analysis.
#[derive(Debug, Clone)]
pub struct ToolClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl ToolClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Invoke `name` with `parameters`.
    ///
    /// Non-200 answers and transport failures come back as an unsuccessful
    /// [`ToolResult`]; only a deadline overrun is an `Err`.
    pub async fn call_tool(&self, name: &str, parameters: JsonValue) -> HlcsResult<ToolResult> {
        let started = Instant::now();
        debug!(tool = name, "Calling remote tool");

        let response = self
            .client
            .post(format!("{}/tools/call", self.base_url))
            .timeout(self.timeout)
            .json(&ToolCall {
                name,
                parameters: &parameters,
            })
            .send()
            .await;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(tool = name, "Remote tool timed out");
                return Err(HlcsError::Timeout {
                    service: name.to_string(),
                    after_ms: self.timeout.as_millis() as u64,
                });
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Remote tool unreachable");
                return Ok(ToolResult::failed(format!("transport: {e}"), elapsed));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!(tool = name, status = status.as_u16(), "Remote tool rejected call");
            return Ok(ToolResult::failed(
                format!("HTTP {}: {}", status.as_u16(), snippet),
                elapsed,
            ));
        }

        match response.json::<ToolResult>().await {
            Ok(mut result) => {
                if result.latency_ms <= 0.0 {
                    result.latency_ms = elapsed;
                }
                debug!(tool = name, success = result.success, latency_ms = result.latency_ms, "Tool returned");
                Ok(result)
            }
            Err(e) if e.is_timeout() => Err(HlcsError::Timeout {
                service: name.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }),
            Err(e) => Ok(ToolResult::failed(format!("malformed response: {e}"), elapsed)),
        }
    }

    /// Names and descriptions of the tools the server offers. Empty when
    /// the server cannot be reached.
    pub async fn list_tools(&self) -> Vec<JsonValue> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            tools: Vec<JsonValue>,
        }

        let response = self
            .client
            .post(format!("{}/tools/list", self.base_url))
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => match r.json::<Listing>().await {
                Ok(listing) => listing.tools,
                Err(e) => {
                    warn!(error = %e, "Tool listing malformed");
                    Vec::new()
                }
            },
            Ok(r) => {
                warn!(status = r.status().as_u16(), "Tool listing rejected");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Tool listing failed");
                Vec::new()
            }
        }
    }

    pub async fn health(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn call_for(&self, name: &str, parameters: JsonValue) -> HlcsResult<JsonValue> {
        self.call_tool(name, parameters).await?.into_result(name)
    }
}

fn text_field(value: &JsonValue, tool: &str, keys: &[&str]) -> HlcsResult<String> {
    if let Some(s) = value.as_str() {
        return Ok(s.to_string());
    }
    keys.iter()
        .find_map(|k| value.get(*k).and_then(JsonValue::as_str))
        .map(str::to_string)
        .ok_or_else(|| HlcsError::upstream(tool, format!("result lacks any of {keys:?}")))
}

fn snippets(value: &JsonValue) -> Vec<String> {
    let items = value
        .get("results")
        .and_then(JsonValue::as_array)
        .or_else(|| value.as_array());

    items
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    JsonValue::String(s) => Some(s.clone()),
                    other => other
                        .get("text")
                        .or_else(|| other.get("content"))
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn context_or_empty(context: Option<&JsonValue>) -> JsonValue {
    context.cloned().unwrap_or_else(|| json!({}))
}

#[async_trait]
impl ComplexityClassifier for ToolClient {
    async fn classify(&self, query: &str, context: Option<&JsonValue>) -> HlcsResult<f32> {
        let result = self
            .call_for(
                "trm.classify",
                json!({"query": query, "context": context_or_empty(context)}),
            )
            .await?;
        result
            .get("complexity")
            .and_then(JsonValue::as_f64)
            .map(|c| (c as f32).clamp(0.0, 1.0))
            .ok_or_else(|| HlcsError::upstream("trm.classify", "result lacks complexity"))
    }

    fn name(&self) -> &str {
        "trm.classify"
    }
}

#[async_trait]
impl TemplateResponder for ToolClient {
    async fn respond(&self, query: &str, context: Option<&JsonValue>) -> HlcsResult<String> {
        let result = self
            .call_for(
                "saul.respond",
                json!({"query": query, "context": context_or_empty(context)}),
            )
            .await?;
        text_field(&result, "saul.respond", &["text", "response"])
    }

    fn name(&self) -> &str {
        "saul.respond"
    }
}

#[async_trait]
impl LanguageModel for ToolClient {
    async fn generate(&self, prompt: &str) -> HlcsResult<String> {
        let result = self
            .call_for(
                "llm.chat",
                json!({
                    "messages": [{"role": "user", "content": prompt}],
                    "temperature": 0.3,
                }),
            )
            .await?;
        text_field(&result, "llm.chat", &["text", "content"])
    }

    fn name(&self) -> &str {
        "llm.chat"
    }
}

#[async_trait]
impl ContextRetriever for ToolClient {
    async fn search(&self, query: &str, k: usize) -> HlcsResult<Vec<String>> {
        let result = self
            .call_for("rag.search", json!({"query": query, "k": k}))
            .await?;
        let mut found = snippets(&result);
        found.truncate(k);
        Ok(found)
    }

    fn name(&self) -> &str {
        "rag.search"
    }
}

#[async_trait]
impl MediaAnalyzer for ToolClient {
    async fn analyze_image(&self, image_url: &str, query: &str) -> HlcsResult<String> {
        let result = self
            .call_for(
                "vision.analyze",
                json!({"image_url": image_url, "query": query}),
            )
            .await?;
        text_field(&result, "vision.analyze", &["description", "text"])
    }

    async fn transcribe_audio(&self, audio_url: &str) -> HlcsResult<String> {
        let result = self
            .call_for("audio.transcribe", json!({"audio_url": audio_url}))
            .await?;
        text_field(&result, "audio.transcribe", &["text", "transcript"])
    }
}
