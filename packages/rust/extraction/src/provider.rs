//! Completion providers.
//!
//! [`CompletionProvider`] is the seam between the extraction client and a
//! language-model API. [`OpenAiProvider`] talks to any OpenAI-compatible
//! chat completions endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use paperconcepts_shared::{AppConfig, PaperConceptsError, Result};

/// One completion call: the instruction prompt and the text it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub payload: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A language-model completion service.
///
/// Implementations classify failures: `ProviderRejected` for permanent
/// errors (bad credentials, invalid request), `ProviderUnavailable` for
/// anything worth retrying (rate limits, server errors, timeouts).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Identifier of the model answering requests; part of the cache key.
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaperConceptsError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &AppConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::new(
            api_key,
            &config.llm.base_url,
            &config.llm.model,
            Duration::from_secs(config.llm.timeout_secs),
        )
    }

    /// Reasoning models take `max_completion_tokens` instead of `max_tokens`.
    fn uses_max_completion_tokens(&self) -> bool {
        let m = self.model.as_str();
        m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") || m.starts_with("gpt-5")
    }
}

/// Statuses worth retrying; every other non-success status is permanent.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::CONFLICT
                | StatusCode::TOO_EARLY
                | StatusCode::TOO_MANY_REQUESTS
        )
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(300)
        .map_or(body.len(), |(i, _)| i);
    body[..end].trim()
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let start = Instant::now();
        let reasoning = self.uses_max_completion_tokens();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.payload,
                },
            ],
            temperature: request.temperature,
            max_tokens: (!reasoning).then_some(request.max_tokens),
            max_completion_tokens: reasoning.then_some(request.max_tokens),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "completion request failed");
                PaperConceptsError::provider_unavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", snippet(&text));
            tracing::warn!(%status, "completion API error");
            return Err(if is_transient_status(status) {
                PaperConceptsError::provider_unavailable(message)
            } else {
                PaperConceptsError::ProviderRejected(message)
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            PaperConceptsError::provider_unavailable(format!("unreadable completion body: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PaperConceptsError::provider_unavailable("completion had no choices"))?
            .message
            .content
            .unwrap_or_default();

        tracing::debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "chat completion"
        );
        Ok(content)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
