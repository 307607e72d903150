//! External reasoner interface: an OpenAI-compatible chat client behind a
//! trait, plus the factory seam tests use to inject deterministic fakes.
//!
//! Transport and auth failures here are fatal to the run; malformed *content*
//! (as opposed to malformed HTTP payloads) is handled by the callers'
//! heuristic fallbacks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::LlmConfig;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Errors from the external reasoner boundary.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("environment variable '{env}' must be set to call model '{model}'")]
    MissingApiKey { env: String, model: String },

    #[error("failed to build HTTP client for '{model}'")]
    ClientBuild {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("transport error calling '{model}'")]
    Transport {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("chat endpoint returned {status} for '{model}'")]
    Http {
        model: String,
        status: reqwest::StatusCode,
    },

    #[error("malformed chat response from '{model}'")]
    Malformed {
        model: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat completion request at the interface boundary. Model identity and
/// sampling parameters come from the client's own [`LlmConfig`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// OpenAI-style function-tool definitions the model may invoke.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// E.g. `{"type": "json_object"}` for strictly structured replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

impl ChatRequest {
    pub fn new(system_prompt: &str, user_prompt: &str) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ],
            tools: Vec::new(),
            response_format: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_json_response(mut self) -> Self {
        self.response_format = Some(json!({"type": "json_object"}));
        self
    }
}

/// An invoked function tool in an assistant reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, passed through verbatim.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: AssistantMessage,
}

/// OpenAI-style chat completion response, reduced to the fields the runtime
/// consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatResponse {
    pub fn message(&self) -> Option<&AssistantMessage> {
        self.choices.first().map(|choice| &choice.message)
    }

    /// Assistant text content, empty when absent.
    pub fn content_text(&self) -> String {
        self.message()
            .and_then(|message| message.content.clone())
            .unwrap_or_default()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message()
            .map(|message| message.tool_calls.as_slice())
            .unwrap_or(&[])
    }
}

/// Interface for chat-completion clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Model name, for tracing.
    fn model(&self) -> &str;
}

/// Builds a client for a given LLM configuration. The runtime owns one
/// factory per run; tests swap in a deterministic router.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError>;
}

/// OpenRouter (OpenAI-compatible) client over reqwest.
pub struct OpenRouterClient {
    config: LlmConfig,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey {
                env: config.api_key_env.clone(),
                model: config.model.clone(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|source| LlmError::ClientBuild {
                model: config.model.clone(),
                source,
            })?;
        Ok(Self {
            config: config.clone(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http,
        })
    }

    fn payload(&self, request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": request.messages,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
        });
        if let Some(max_tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(request.tools);
        }
        if let Some(response_format) = &request.response_format {
            payload["response_format"] = response_format.clone();
        }
        payload
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(&request))
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                model: self.config.model.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Http {
                model: self.config.model.clone(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| LlmError::Transport {
                model: self.config.model.clone(),
                source,
            })?;
        serde_json::from_str(&body).map_err(|source| LlmError::Malformed {
            model: self.config.model.clone(),
            source,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Production factory: one fresh [`OpenRouterClient`] per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenRouterFactory;

impl ClientFactory for OpenRouterFactory {
    fn client_for(&self, config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError> {
        Ok(Box::new(OpenRouterClient::new(config)?))
    }
}
