use std::time::{Duration, Instant};

use async_trait::async_trait;
use leadflow_core::config::LlmConfig;
use reqwest::header;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::{GenerationError, LlmClient};

const MAX_ERROR_BODY_CHARS: usize = 400;

/// Chat-completions client for OpenRouter, OpenAI, and Ollama's OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GenerationError::Backend(format!("http client setup: {error}")))?;

        Ok(Self {
            http_client,
            base_url: config.effective_base_url().trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let start = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };

        let mut request = self
            .http_client
            .post(self.endpoint())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            warn!(
                event_name = "generation.backend.request_failed",
                model = %self.model,
                error = %error,
                "llm request failed"
            );
            if error.is_timeout() {
                GenerationError::Timeout { after_ms: duration_ms(self.timeout) }
            } else {
                GenerationError::Backend(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(
                event_name = "generation.backend.http_error",
                model = %self.model,
                status = %status,
                "llm backend returned an error status"
            );
            return Err(GenerationError::Backend(format!(
                "status {status}: {}",
                truncate_for_error(&error_text, MAX_ERROR_BODY_CHARS)
            )));
        }

        let payload = response.text().await.map_err(|error| {
            if error.is_timeout() {
                GenerationError::Timeout { after_ms: duration_ms(self.timeout) }
            } else {
                GenerationError::Backend(error.to_string())
            }
        })?;
        let content = extract_content(&payload)?;

        debug!(
            event_name = "generation.backend.completed",
            model = %self.model,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            content_chars = content.chars().count(),
            "llm completion received"
        );
        Ok(content)
    }
}

fn extract_content(payload: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(payload).map_err(|error| {
        GenerationError::Backend(format!("unreadable completion payload: {error}"))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GenerationError::Backend("completion had no message content".to_owned()))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
