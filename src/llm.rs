//! Language-model abstraction and the chat-completions client.
//!
//! The pipeline treats the model as a black box behind [`LanguageModel`]:
//! messages in, an assistant turn out. Two backends share one HTTP client:
//!
//! - **`openai`** — `POST {endpoint}/chat/completions` with a bearer key from
//!   `OPENAI_API_KEY` (endpoint defaults to `https://api.openai.com/v1`).
//! - **`azure`** — `POST {endpoint}/openai/deployments/{deployment}/chat/completions`
//!   with an `api-key` header from `AZURE_OPENAI_KEY`.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, …, capped at 2^5)
//! - Other 4xx → fail immediately
//! - Network errors → retry

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LlmConfig, SamplingConfig};

/// A function the model may call.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One assistant turn: free text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(AssistantMessage),
    Tool { call_id: String, content: String },
}

/// What a single-prompt model call hands back.
///
/// Depending on the call path the model yields an already-parsed value, a
/// bare string, or the whole assistant message. The coercer accepts all
/// three.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Structured(Value),
    Text(String),
    Message(AssistantMessage),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model or deployment identifier, for logs.
    fn model_name(&self) -> &str;

    /// Run one chat turn. `tools` may be empty.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        sampling: SamplingConfig,
    ) -> Result<AssistantMessage>;

    /// Single prompt, no tools. Returns the raw assistant message.
    async fn complete(&self, prompt: &str, sampling: SamplingConfig) -> Result<ModelOutput> {
        let reply = self
            .chat(&[ChatMessage::User(prompt.to_string())], &[], sampling)
            .await?;
        Ok(ModelOutput::Message(reply))
    }
}

/// Build the configured model backend.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" | "azure" => Ok(Arc::new(ChatCompletionsModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled ============

/// Used when `llm.provider = "disabled"`. Every call fails.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
        _sampling: SamplingConfig,
    ) -> Result<AssistantMessage> {
        bail!("LLM provider is disabled")
    }
}

// ============ Chat Completions ============

enum Auth {
    Bearer(String),
    ApiKey(String),
}

pub struct ChatCompletionsModel {
    client: reqwest::Client,
    url: String,
    auth: Auth,
    /// Sent in the body for OpenAI; Azure routes by deployment instead.
    model: Option<String>,
    label: String,
    max_retries: u32,
}

impl ChatCompletionsModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        match config.provider.as_str() {
            "openai" => {
                let key = std::env::var("OPENAI_API_KEY")
                    .context("OPENAI_API_KEY environment variable not set")?;
                let model = config
                    .model
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
                let base = config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                Ok(Self {
                    client,
                    url: format!("{}/chat/completions", base.trim_end_matches('/')),
                    auth: Auth::Bearer(key),
                    label: model.clone(),
                    model: Some(model),
                    max_retries: config.max_retries,
                })
            }
            "azure" => {
                let key = std::env::var("AZURE_OPENAI_KEY")
                    .context("AZURE_OPENAI_KEY environment variable not set")?;
                let endpoint = config
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("llm.endpoint required for Azure provider"))?;
                let deployment = config
                    .deployment
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("llm.deployment required for Azure provider"))?;
                Ok(Self {
                    client,
                    url: format!(
                        "{}/openai/deployments/{}/chat/completions?api-version={}",
                        endpoint.trim_end_matches('/'),
                        deployment,
                        config.api_version
                    ),
                    auth: Auth::ApiKey(key),
                    label: deployment,
                    model: None,
                    max_retries: config.max_retries,
                })
            }
            other => bail!("provider '{}' does not use the chat-completions API", other),
        }
    }

    async fn post_with_retry(&self, body: &Value) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let req = self.client.post(&self.url).json(body);
            let req = match &self.auth {
                Auth::Bearer(key) => req.header("Authorization", format!("Bearer {}", key)),
                Auth::ApiKey(key) => req.header("api-key", key),
            };

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(target: "llm", %status, attempt, "retryable chat completion error");
                        last_err = Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(target: "llm", error = %e, attempt, "chat completion request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.label
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        sampling: SamplingConfig,
    ) -> Result<AssistantMessage> {
        let body = build_request_body(self.model.as_deref(), messages, tools, sampling);
        debug!(target: "llm", model = %self.label, messages = messages.len(), tools = tools.len(), "chat completion");
        let json = self.post_with_retry(&body).await?;
        parse_chat_response(&json)
    }
}

/// Serialize a chat request in the chat-completions wire format.
pub fn build_request_body(
    model: Option<&str>,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    sampling: SamplingConfig,
) -> Value {
    let mut body = json!({
        "messages": messages.iter().map(message_to_json).collect::<Vec<_>>(),
        "temperature": sampling.temperature,
        "max_tokens": sampling.max_tokens,
    });
    if let Some(model) = model {
        body["model"] = json!(model);
    }
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tool_choice"] = json!("auto");
    }
    body
}

fn message_to_json(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(text) => json!({ "role": "system", "content": text }),
        ChatMessage::User(text) => json!({ "role": "user", "content": text }),
        ChatMessage::Assistant(msg) => {
            let mut v = json!({ "role": "assistant", "content": msg.content });
            if !msg.tool_calls.is_empty() {
                v["tool_calls"] = msg
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments.to_string() }
                        })
                    })
                    .collect();
            }
            v
        }
        ChatMessage::Tool { call_id, content } => {
            json!({ "role": "tool", "tool_call_id": call_id, "content": content })
        }
    }
}

/// Extract the first choice's assistant message.
///
/// Tool-call arguments arrive as a JSON-encoded string; one that does not
/// parse is kept as a plain string value.
pub fn parse_chat_response(json: &Value) -> Result<AssistantMessage> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| anyhow::anyhow!("Invalid chat response: tool call without function"))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid chat response: tool call without name"))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(AssistantMessage {
        content,
        tool_calls,
    })
}
