//! Generic OpenAI-wire provider, usable for OpenAI, Anthropic, Gemini,
//! Ollama, and OpenRouter behind one HTTP+JSON shape (spec §4.A).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{AgentShError, Result};
use crate::llm::http_pool::{HttpClientPool, HttpPoolConfig};
use crate::llm::provider::{LLMProvider, StreamResponse};
use crate::llm::types::{
    CompletionRequest, LLMResponse, Message as AppMessage, MessageRole, StopReason, StreamChunk,
    ToolCall,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamResponse {
    choices: Vec<StreamChoice>,
}

/// Configuration for a single OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub extra_headers: HashMap<String, String>,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            default_model: String::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
            extra_headers: HashMap::new(),
        }
    }
}

impl OpenAICompatibleConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "https://api.openai.com/v1").with_model("gpt-4.1")
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "https://api.anthropic.com/v1")
            .with_model("claude-sonnet-4.5")
            .with_header("anthropic-version", "2023-06-01")
    }

    pub fn ollama() -> Self {
        Self::new("", "http://localhost:11434/v1").with_model("llama3")
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "https://openrouter.ai/api/v1").with_model("anthropic/claude-sonnet-4.5")
    }
}

/// Provider speaking the OpenAI chat-completions wire protocol, shared by
/// every vendor this crate supports out of the box.
pub struct OpenAICompatibleProvider {
    config: OpenAICompatibleConfig,
    provider_name: String,
    pool: std::sync::Arc<HttpClientPool>,
}

impl OpenAICompatibleProvider {
    pub fn new(config: OpenAICompatibleConfig, provider_name: impl Into<String>) -> Self {
        Self::with_pool(config, provider_name, crate::llm::http_pool::global_pool())
    }

    pub fn with_pool(
        config: OpenAICompatibleConfig,
        provider_name: impl Into<String>,
        pool: std::sync::Arc<HttpClientPool>,
    ) -> Self {
        Self {
            config,
            provider_name: provider_name.into(),
            pool,
        }
    }

    fn convert_message(msg: &AppMessage) -> ApiMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };

        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: tc.id.clone(),
                        kind: "function".to_owned(),
                        function: ApiFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };

        ApiMessage {
            role: role.to_owned(),
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.clone())
        };

        ChatCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            tools,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            stream: request.stream,
        }
    }

    fn auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    fn pool_config(&self) -> HttpPoolConfig {
        HttpPoolConfig {
            timeout: self.config.timeout,
            retry_count: self.config.max_retries,
            ..Default::default()
        }
    }

    fn classify_error(&self, status: reqwest::StatusCode, body: &str) -> AgentShError {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                AgentShError::Auth {
                    provider: self.provider_name.clone(),
                }
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => AgentShError::RateLimit {
                provider: self.provider_name.clone(),
                retry_after_secs: None,
            },
            _ => AgentShError::Provider {
                provider: self.provider_name.clone(),
                message: format!("{status}: {body}"),
            },
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn invoke(&self, request: CompletionRequest) -> Result<LLMResponse> {
        let client = self.pool.client_for(&self.provider_name, &self.pool_config())?;
        let api_request = self.build_request(&request);
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut builder = client.post(&url).header("Content-Type", "application/json");
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }
        for (key, value) in &self.config.extra_headers {
            builder = builder.header(key, value);
        }

        let started = Instant::now();
        let response = builder.json(&api_request).send().await.map_err(|e| {
            self.pool
                .record(&self.provider_name, false, 0, 0, started.elapsed());
            AgentShError::Provider {
                provider: self.provider_name.clone(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.pool
                .record(&self.provider_name, false, 0, body.len() as u64, started.elapsed());
            return Err(self.classify_error(status, &body));
        }

        let bytes = response.bytes().await.map_err(|e| AgentShError::Provider {
            provider: self.provider_name.clone(),
            message: e.to_string(),
        })?;
        self.pool
            .record(&self.provider_name, true, 0, bytes.len() as u64, started.elapsed());

        let api_response: ChatCompletionResponse =
            serde_json::from_slice(&bytes).map_err(|e| AgentShError::Provider {
                provider: self.provider_name.clone(),
                message: format!("failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentShError::Provider {
                provider: self.provider_name.clone(),
                message: "no choices in response".into(),
            })?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect();

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("stop") | None => {
                if tool_calls.is_empty() {
                    StopReason::EndTurn
                } else {
                    StopReason::ToolUse
                }
            }
            Some("content_filter") => StopReason::StopSequence,
            Some(_) => StopReason::EndTurn,
        };

        Ok(LLMResponse {
            content: choice.message.content,
            tool_calls,
            stop_reason,
            input_tokens: api_response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens: api_response
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
            model: api_response.model,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResponse> {
        let client = self.pool.client_for(&self.provider_name, &self.pool_config())?;
        let mut api_request = self.build_request(&request);
        api_request.stream = Some(true);

        let url = format!("{}/chat/completions", self.config.base_url);
        let mut builder = client.post(&url).header("Content-Type", "application/json");
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }
        for (key, value) in &self.config.extra_headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .json(&api_request)
            .send()
            .await
            .map_err(|e| AgentShError::Provider {
                provider: self.provider_name.clone(),
                message: e.to_string(),
            })?;

        let event_stream = response.bytes_stream().eventsource();
        let provider_name = self.provider_name.clone();

        let stream = event_stream.filter_map(move |event| {
            let provider_name = provider_name.clone();
            async move {
                match event {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            return Some(Ok(StreamChunk {
                                delta: String::new(),
                                is_final: true,
                                finish_reason: Some("stop".to_owned()),
                            }));
                        }
                        match serde_json::from_str::<ApiStreamResponse>(&event.data) {
                            Ok(chunk) => chunk.choices.into_iter().next().map(|choice| {
                                Ok(StreamChunk {
                                    delta: choice.delta.content.unwrap_or_default(),
                                    is_final: choice.finish_reason.is_some(),
                                    finish_reason: choice.finish_reason,
                                })
                            }),
                            Err(e) => Some(Err(AgentShError::Provider {
                                provider: provider_name,
                                message: format!("failed to parse stream chunk: {e}"),
                            })),
                        }
                    }
                    Err(e) => Some(Err(AgentShError::Provider {
                        provider: provider_name,
                        message: format!("stream error: {e}"),
                    })),
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn context_limit(&self) -> usize {
        128_000
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;

    #[test]
    fn config_anthropic_sets_version_header() {
        let config = OpenAICompatibleConfig::anthropic("key");
        assert_eq!(
            config.extra_headers.get("anthropic-version"),
            Some(&"2023-06-01".to_owned())
        );
    }

    #[test]
    fn config_ollama_has_no_api_key() {
        let config = OpenAICompatibleConfig::ollama();
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn build_request_carries_tools() {
        let provider = OpenAICompatibleProvider::new(OpenAICompatibleConfig::openai("k"), "openai");
        let tool_schema = serde_json::json!({"type": "function", "function": {"name": "shell.run"}});
        let request = CompletionRequest::new("gpt-4.1", vec![Message::user("hi")])
            .with_tools(vec![tool_schema.clone()]);
        let api_request = provider.build_request(&request);
        assert_eq!(api_request.tools, Some(vec![tool_schema]));
    }

    #[test]
    fn convert_message_round_trips_tool_call_id() {
        let msg = Message::tool_result("call_1", "done");
        let api_msg = OpenAICompatibleProvider::convert_message(&msg);
        assert_eq!(api_msg.role, "tool");
        assert_eq!(api_msg.tool_call_id.as_deref(), Some("call_1"));
    }
}
