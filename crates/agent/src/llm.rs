//! LLM completion capability.
//!
//! [`LlmClient`] is the seam the reasoning loop talks to. The shipped
//! implementation speaks the OpenAI chat-completions wire format, which both
//! OpenAI and Ollama expose.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use datasage_core::config::LlmConfig;
use datasage_core::domain::conversation::{Message, Role, ToolCall};

use crate::tools::ToolSpec;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub max_output_tokens: u32,
}

/// Either a final text answer (no tool calls) or a list of tool invocations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmErrorKind {
    Auth,
    Billing,
    RateLimit,
    NotFound,
    Timeout,
    Network,
    ServerError,
    Decode,
    Unknown,
}

#[derive(Clone, Debug, Error)]
#[error("llm provider error ({kind:?}): {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self { kind, status: None, message: message.into(), retry_after_secs: None }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => LlmErrorKind::Auth,
            402 => LlmErrorKind::Billing,
            404 => LlmErrorKind::NotFound,
            408 => LlmErrorKind::Timeout,
            429 => LlmErrorKind::RateLimit,
            500 | 502 | 503 | 504 => LlmErrorKind::ServerError,
            _ => LlmErrorKind::Unknown,
        };
        let retry_after_secs =
            if kind == LlmErrorKind::RateLimit { extract_retry_after(body) } else { None };

        Self { kind, status: Some(status), message: truncate(body, 500), retry_after_secs }
    }

    pub fn network(error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() { LlmErrorKind::Timeout } else { LlmErrorKind::Network };
        Self::new(kind, error.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            LlmErrorKind::RateLimit
                | LlmErrorKind::Timeout
                | LlmErrorKind::Network
                | LlmErrorKind::ServerError
        )
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError>;
}

pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| LlmError::new(LlmErrorKind::Unknown, "llm.base_url is not set"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::new(LlmErrorKind::Unknown, error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, body: &Value) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| LlmError::network(&error))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| LlmError::network(&error))?;

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text));
        }

        debug!(
            event_name = "agent.llm.response",
            body = %truncate(&text, 2000),
            "llm response received"
        );
        let data: Value = serde_json::from_str(&text)
            .map_err(|error| LlmError::new(LlmErrorKind::Decode, error.to_string()))?;
        parse_completion(&data)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let body = build_request_body(&self.model, self.temperature, &request);
        let mut attempt = 0;

        loop {
            match self.send_once(&body).await {
                Ok(completion) => return Ok(completion),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let delay = error
                        .retry_after_secs
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| backoff_delay(attempt));
                    warn!(
                        event_name = "agent.llm.retry",
                        attempt = attempt + 1,
                        kind = ?error.kind,
                        delay_ms = delay.as_millis() as u64,
                        "retrying llm call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub(crate) fn build_request_body(
    model: &str,
    temperature: f32,
    request: &CompletionRequest<'_>,
) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_output_tokens,
        "temperature": temperature,
    });

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }

    body
}

fn wire_message(message: &Message) -> Value {
    let mut wire = json!({ "role": message.role.as_str(), "content": message.content });

    if message.role == Role::Assistant && !message.tool_calls.is_empty() {
        if message.content.is_empty() {
            wire["content"] = Value::Null;
        }
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments.to_string() },
                })
            })
            .collect();
    }

    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }

    wire
}

pub(crate) fn parse_completion(data: &Value) -> Result<Completion, LlmError> {
    let message = data["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| LlmError::new(LlmErrorKind::Decode, "no choices in response"))?;

    let text = message["content"].as_str().unwrap_or_default().trim().to_string();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| {
                    let raw_arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
                    // unparseable arguments are passed through and rejected by dispatch
                    let arguments = serde_json::from_str(raw_arguments)
                        .unwrap_or_else(|_| Value::String(raw_arguments.to_string()));
                    ToolCall {
                        id: call["id"]
                            .as_str()
                            .filter(|id| !id.is_empty())
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("call_{index}")),
                        name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = TokenUsage {
        input_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(Completion { text, tool_calls, usage })
}

/// 250ms doubling per attempt, capped at 8s.
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(250u64.saturating_mul(factor).min(8_000))
}

fn extract_retry_after(body: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["retry_after"]
        .as_u64()
        .or_else(|| value["retry_after"].as_u64())
        .or_else(|| value["error"]["retry_after"].as_f64().map(|secs| secs.ceil() as u64))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
