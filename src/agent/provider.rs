//! Decision provider clients
//!
//! One client per wire family:
//! - OpenAI-compatible chat completions (OpenAI, DeepSeek, Grok, Qwen, ...)
//! - Anthropic messages
//! - Google Gemini generateContent
//! - Scripted, an in-process provider for offline runs and tests

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::protocol::RawCompletion;
use crate::config::{AgentSpec, ProviderConfig};
use crate::domain::ProviderKind;
use crate::error::{ArenaError, ProviderError, Result};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_DEFAULT_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GEMINI_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Longest error body kept in a `Status` error
const MAX_ERROR_BODY: usize = 500;

/// Decision used by scripted agents that have no script configured
const HOLD_SCRIPT: &str =
    r#"{"sentiment":"neutral","top_picks":[],"avoid_list":[],"summary":"holding","actions":[]}"#;

/// A remote (or scripted) model that answers a system prompt plus a brief
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Send one prompt and return the raw text answer
    async fn send_prompt(
        &self,
        system: &str,
        context: &str,
    ) -> std::result::Result<RawCompletion, ProviderError>;
}

/// Connection settings shared by the HTTP providers
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl EndpointConfig {
    /// Resolve an agent's endpoint, reading its key from the environment
    pub fn from_spec(spec: &AgentSpec, cfg: &ProviderConfig, default_url: &str) -> Self {
        let api_key = spec
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default();
        Self {
            base_url: spec
                .base_url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: spec.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            timeout_secs: cfg.timeout_secs,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn ensure_configured(&self, kind: ProviderKind) -> std::result::Result<(), ProviderError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(format!(
                "{kind} API key missing for model {}",
                self.model
            )))
        }
    }
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ArenaError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Send a JSON request and return the parsed body, mapping non-2xx to `Status`
async fn post_json(
    request: reqwest::RequestBuilder,
    body: &impl Serialize,
) -> std::result::Result<Value, ProviderError> {
    let response = request.json(body).send().await?;

    let status = response.status();
    if !status.is_success() {
        let mut text = response.text().await.unwrap_or_default();
        if text.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        warn!(status = status.as_u16(), "provider returned error status");
        return Err(ProviderError::Status {
            code: status.as_u16(),
            body: text,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::Malformed(format!("response body is not JSON: {}", e)))
}

// ==================== OpenAI-compatible ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

/// Chat-completions client for any OpenAI-compatible base URL
pub struct OpenAiCompatibleProvider {
    config: EndpointConfig,
    http: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let http = http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn parse(body: &Value) -> std::result::Result<RawCompletion, ProviderError> {
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed("missing choices[0].message.content".into()))?;
        let tokens = body
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(RawCompletion {
            text: text.to_string(),
            tokens,
        })
    }
}

#[async_trait]
impl DecisionProvider for OpenAiCompatibleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_prompt(
        &self,
        system: &str,
        context: &str,
    ) -> std::result::Result<RawCompletion, ProviderError> {
        self.config.ensure_configured(self.kind())?;
        debug!(model = %self.config.model, "sending chat completion request");

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: context.to_string(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let builder = self.http.post(&url).bearer_auth(&self.config.api_key);
        let body = post_json(builder, &request).await?;
        Self::parse(&body)
    }
}

// ==================== Anthropic ====================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

/// Anthropic messages API client
pub struct AnthropicProvider {
    config: EndpointConfig,
    http: Client,
}

impl AnthropicProvider {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let http = http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn parse(body: &Value) -> std::result::Result<RawCompletion, ProviderError> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed("missing content array".into()))?;
        let text: String = blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ProviderError::Malformed("no text blocks in content".into()));
        }
        let usage = |key: &str| {
            body.pointer(&format!("/usage/{key}"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Ok(RawCompletion {
            text,
            tokens: usage("input_tokens") + usage("output_tokens"),
        })
    }
}

#[async_trait]
impl DecisionProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_prompt(
        &self,
        system: &str,
        context: &str,
    ) -> std::result::Result<RawCompletion, ProviderError> {
        self.config.ensure_configured(self.kind())?;
        debug!(model = %self.config.model, "sending messages request");

        let request = MessagesRequest {
            model: &self.config.model,
            system,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: context.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let url = format!("{}/messages", self.config.base_url);
        let builder = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let body = post_json(builder, &request).await?;
        Self::parse(&body)
    }
}

// ==================== Gemini ====================

/// Google Gemini generateContent client
pub struct GeminiProvider {
    config: EndpointConfig,
    http: Client,
}

impl GeminiProvider {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let http = http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn parse(body: &Value) -> std::result::Result<RawCompletion, ProviderError> {
        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed("missing candidates[0].content.parts".into()))?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ProviderError::Malformed("no text parts in candidate".into()));
        }
        let tokens = body
            .pointer("/usageMetadata/totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(RawCompletion { text, tokens })
    }
}

#[async_trait]
impl DecisionProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_prompt(
        &self,
        system: &str,
        context: &str,
    ) -> std::result::Result<RawCompletion, ProviderError> {
        self.config.ensure_configured(self.kind())?;
        debug!(model = %self.config.model, "sending generateContent request");

        let request = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": context }] }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_tokens,
            }
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let builder = self
            .http
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())]);
        let body = post_json(builder, &request).await?;
        Self::parse(&body)
    }
}

// ==================== Scripted ====================

/// Deterministic in-process provider.
///
/// Replays its responses in order; the last one repeats once the script is
/// exhausted.
pub struct ScriptedProvider {
    model: String,
    responses: Vec<std::result::Result<String, ProviderError>>,
    cursor: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    /// Always answer with `text`
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::sequence(vec![Ok(text.into())])
    }

    /// Always fail with `error`
    pub fn failing(error: ProviderError) -> Self {
        Self::sequence(vec![Err(error)])
    }

    pub fn sequence(responses: Vec<std::result::Result<String, ProviderError>>) -> Self {
        Self {
            model: "scripted".to_string(),
            responses,
            cursor: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Number of prompts received so far
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Scripted
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send_prompt(
        &self,
        system: &str,
        context: &str,
    ) -> std::result::Result<RawCompletion, ProviderError> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = match self.responses.get(idx).or_else(|| self.responses.last()) {
            Some(r) => r.clone(),
            None => Err(ProviderError::NotConfigured("empty script".to_string())),
        }?;

        // Rough chars/4 estimate, same order of magnitude as real tokenizers.
        let tokens = ((system.len() + context.len() + response.len()) / 4) as u64;
        Ok(RawCompletion {
            text: response,
            tokens,
        })
    }
}

/// Build the provider an agent spec asks for.
///
/// HTTP providers without a key are still built; they fail per call with
/// `NotConfigured` so one misconfigured agent does not stop a session.
pub fn build_provider(spec: &AgentSpec, cfg: &ProviderConfig) -> Result<Arc<dyn DecisionProvider>> {
    let provider: Arc<dyn DecisionProvider> = match spec.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiCompatibleProvider::new(EndpointConfig::from_spec(
            spec,
            cfg,
            OPENAI_DEFAULT_URL,
        ))?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(EndpointConfig::from_spec(
            spec,
            cfg,
            ANTHROPIC_DEFAULT_URL,
        ))?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(EndpointConfig::from_spec(
            spec,
            cfg,
            GEMINI_DEFAULT_URL,
        ))?),
        ProviderKind::Scripted => Arc::new(
            ScriptedProvider::fixed(spec.script.clone().unwrap_or_else(|| HOLD_SCRIPT.to_string()))
                .with_model(spec.model.clone()),
        ),
    };
    Ok(provider)
}
