//! Chat access to AI agents. Runners depend on [`AgentChatClient`]; the
//! HTTP implementation talks to an OpenAI-compatible endpoint.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

use crate::error::{OrchestratorError, Result};
use crate::tools::{ToolCall, ToolSpec};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const ERROR_BODY_PREVIEW: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[async_trait]
pub trait AgentChatClient: Send + Sync {
    async fn send_message(
        &self,
        agent: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse>;

    async fn send_message_with_tools(
        &self,
        agent: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &ChatOptions,
    ) -> Result<ChatResponse>;
}

/// Client for an OpenAI-compatible `chat/completions` endpoint. The agent
/// name is sent as the model unless the options override it.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpAgentClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OrchestratorError::Validation(format!("Invalid agent URL {base_url}: {e}")))?;
        let http = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OrchestratorError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    async fn post(
        &self,
        agent: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        let model = options.model.as_deref().unwrap_or(agent);
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
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
            body["tools"] = Value::Array(wire_tools);
            body["tool_choice"] = json!("auto");
        }

        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        debug!(agent, model, messages = messages.len(), tools = tools.len(), "Sending chat request");
        let response = request.send().await.map_err(|e| {
            error!(agent, error = %e, "Chat request failed");
            OrchestratorError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Serialization(e.to_string()))?;
        parse_completion(&value)
    }
}

#[async_trait]
impl AgentChatClient for HttpAgentClient {
    async fn send_message(
        &self,
        agent: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        self.post(agent, messages, &[], options).await
    }

    async fn send_message_with_tools(
        &self,
        agent: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        self.post(agent, messages, tools, options).await
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}

fn map_status(status: StatusCode, body: &str) -> OrchestratorError {
    let detail = format!("status {}: {}", status.as_u16(), truncate(body, ERROR_BODY_PREVIEW));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OrchestratorError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => OrchestratorError::RateLimited(detail),
        s if s.is_server_error() => OrchestratorError::Network(detail),
        _ => OrchestratorError::ExecutionFailed(format!("Agent request failed with {detail}")),
    }
}

fn parse_completion(value: &Value) -> Result<ChatResponse> {
    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Err(OrchestratorError::ExecutionFailed(message.to_string()));
    }

    let message = value
        .pointer("/choices/0/message")
        .ok_or_else(|| OrchestratorError::ExecutionFailed("Agent returned no choices".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    for call in message
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(name) = call.pointer("/function/name").and_then(Value::as_str) else {
            continue;
        };
        let params = match call.pointer("/function/arguments") {
            Some(Value::String(raw)) => serde_json::from_str(raw)?,
            Some(other) => other.clone(),
            None => json!({}),
        };
        tool_calls.push(ToolCall::new(name, params));
    }

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

/// A recorded request to [`ScriptedAgentClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub agent: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Replays queued responses in order. Runs out with an execution error.
#[derive(Debug, Default)]
pub struct ScriptedAgentClient {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.responses.lock().push_back(Ok(ChatResponse::text(content)));
        self
    }

    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.responses.lock().push_back(Ok(ChatResponse {
            content: String::new(),
            tool_calls: calls,
        }));
        self
    }

    pub fn with_error(self, error: OrchestratorError) -> Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn next(&self, agent: &str, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatResponse> {
        self.requests.lock().push(RecordedRequest {
            agent: agent.to_string(),
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(OrchestratorError::ExecutionFailed(
                "No scripted response left".to_string(),
            ))
        })
    }
}

#[async_trait]
impl AgentChatClient for ScriptedAgentClient {
    async fn send_message(
        &self,
        agent: &str,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatResponse> {
        self.next(agent, messages, &[])
    }

    async fn send_message_with_tools(
        &self,
        agent: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        _options: &ChatOptions,
    ) -> Result<ChatResponse> {
        self.next(agent, messages, tools)
    }
}
