//! Generation backends.
//!
//! The generation service is consumed as an opaque completion call: prompt
//! in, text out, low temperature. `HttpBackend` speaks the
//! OpenAI-compatible chat API and retries transient failures with
//! exponential backoff; a response without usable content yields an empty
//! string rather than an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::LlmError;

/// Generation-service configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// OpenAI-compatible endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// API key (optional for local services)
    pub api_key: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Low temperature keeps answers grounded in the quoted passages
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub initial_backoff: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        use mediserve_config::constants::generation;
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
            api_key: None,
            max_tokens: generation::DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            timeout: Duration::from_millis(generation::DEFAULT_TIMEOUT_MS),
            max_retries: generation::DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl From<&mediserve_config::GenerationSettings> for GenerationConfig {
    fn from(settings: &mediserve_config::GenerationSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: Duration::from_millis(settings.timeout_ms),
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Text-in/text-out completion service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Complete `prompt`; an empty string means the service returned no
    /// usable content.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Model identifier.
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible HTTP backend.
pub struct HttpBackend {
    client: Client,
    config: GenerationConfig,
}

impl HttpBackend {
    pub fn new(config: GenerationConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    async fn execute(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let mut builder = self.client.post(self.chat_url()).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {body}")));
            }
            return Err(LlmError::Api(format!("{status}: {body}")));
        }

        let response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            stream: false,
        };

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max_retries = self.config.max_retries,
                    "generation request failed, retrying after {backoff:?}"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(&request).await {
                Ok(text) => return Ok(text),
                Err(err) if Self::is_retryable(&err) => last_error = Some(err),
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("retries exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
