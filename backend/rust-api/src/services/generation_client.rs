use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::GenerationSettings;
use crate::metrics::record_generation;
use crate::utils::retry::{retry_async_when, RetryConfig};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation provider error: {0}")]
    Provider(String),

    #[error("invalid generation output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Quiz,
    Hint,
    Suggestions,
}

impl PromptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::Quiz => "quiz",
            PromptKind::Hint => "hint",
            PromptKind::Suggestions => "suggestions",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub text: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object instead of free text.
    pub json_response: bool,
}

/// `Generate(prompt) -> text` against some text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint (Groq by default).
pub struct GroqClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GroqClient {
    pub fn new(settings: &GenerationSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for GroqClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt.text,
            }],
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
            response_format: prompt.json_response.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Provider(format!(
                "provider returned {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GenerationError::InvalidOutput("empty completion".to_string()))
    }
}

/// Retry budget for one generation call: the first attempt plus the
/// configured number of retries.
pub fn retry_policy(settings: &GenerationSettings) -> RetryConfig {
    RetryConfig::with_attempts(settings.retry_attempts + 1)
}

/// Calls the generator with internal retries for provider errors, the whole
/// sequence bounded by `timeout`.
pub async fn generate_bounded(
    generator: &dyn TextGenerator,
    prompt: &Prompt,
    timeout: Duration,
    retry: RetryConfig,
) -> Result<String, GenerationError> {
    let started = Instant::now();
    let attempt = retry_async_when(
        retry,
        |e: &GenerationError| matches!(e, GenerationError::Provider(_)),
        || generator.generate(prompt),
    );

    let result = match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(timeout)),
    };

    let outcome = match &result {
        Ok(_) => "success",
        Err(GenerationError::Timeout(_)) => "timeout",
        Err(GenerationError::Provider(_)) => "provider_error",
        Err(GenerationError::InvalidOutput(_)) => "invalid_output",
    };
    record_generation(prompt.kind.as_str(), outcome, started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::warn!(kind = prompt.kind.as_str(), error = %e, "Text generation failed");
    }
    result
}
