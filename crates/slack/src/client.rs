//! Slack Web API client for `chat.postMessage` and `apps.connections.open`.
//!
//! Retries live here and nowhere else: timeouts, connect errors, HTTP 429 and
//! 5xx are retried up to `max_retries` times. A Slack `ok: false` body is final.

use std::time::Duration;

use async_trait::async_trait;
use leadflow_core::config::{SlackConfig, MAX_RETRY_DELAY_MS};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::transport::{ChatTransport, PostedMessage, SendError};

#[derive(Debug, Deserialize)]
struct ChatPostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    ok: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250 }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(delay) = retry_after {
            return delay.max(Duration::from_millis(self.base_delay_ms));
        }
        let exponent = attempt.saturating_sub(1).min(10);
        let scaled = self.base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
        Duration::from_millis(scaled.min(MAX_RETRY_DELAY_MS))
    }
}

#[derive(Clone)]
pub struct SlackWebClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for SlackWebClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackWebClient")
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl SlackWebClient {
    pub fn new(
        api_base: &str,
        bot_token: SecretString,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, SendError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("leadflow-slack"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout.max(Duration::from_millis(1)))
            .build()
            .map_err(|error| SendError::Network(format!("http client setup: {error}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim().trim_end_matches('/').to_owned(),
            bot_token,
            request_timeout,
            retry,
        })
    }

    pub fn from_config(config: &SlackConfig) -> Result<Self, SendError> {
        Self::new(
            &config.api_base,
            config.bot_token.clone(),
            Duration::from_millis(config.request_timeout_ms),
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay_ms: config.retry_base_delay_ms,
            },
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Asks Slack for a Socket Mode websocket URL. Needs the `xapp-` app token.
    pub async fn open_socket_url(&self, app_token: &SecretString) -> Result<String, SendError> {
        let url = self.method_url("apps.connections.open");
        let response: ConnectionsOpenResponse = self
            .request_json("apps.connections.open", || {
                self.http.post(&url).bearer_auth(app_token.expose_secret())
            })
            .await?;

        if !response.ok {
            return Err(rejection(response.error));
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| SendError::Rejected("apps.connections.open returned no url".to_owned()))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T, SendError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            let can_retry = attempt <= self.retry.max_retries;

            match builder().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|error| {
                            SendError::Network(format!("undecodable {operation} response: {error}"))
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    if can_retry && is_retryable_status(status.as_u16()) {
                        let delay = self.retry.delay(attempt, retry_after);
                        debug!(
                            event_name = "transport.slack.retry",
                            operation,
                            attempt,
                            status = status.as_u16(),
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "retrying slack api call"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status.as_u16() == 429 {
                        return Err(SendError::RateLimited {
                            retry_after_secs: retry_after.map(|delay| delay.as_secs()),
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(SendError::Rejected(format!(
                        "{operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 320)
                    )));
                }
                Err(error) => {
                    if can_retry && is_retryable_transport_error(&error) {
                        let delay = self.retry.delay(attempt, None);
                        debug!(
                            event_name = "transport.slack.retry",
                            operation,
                            attempt,
                            error = %error,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "retrying slack api call"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!(
                        event_name = "transport.slack.request_failed",
                        operation,
                        attempt,
                        error = %error,
                        "slack api call failed"
                    );
                    if error.is_timeout() {
                        return Err(SendError::Timeout {
                            after_ms: u64::try_from(self.request_timeout.as_millis())
                                .unwrap_or(u64::MAX),
                        });
                    }
                    return Err(SendError::Network(error.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl ChatTransport for SlackWebClient {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage, SendError> {
        let payload = post_message_payload(channel, text, thread_ts);
        let url = self.method_url("chat.postMessage");
        let response: ChatPostMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http.post(&url).bearer_auth(self.bot_token.expose_secret()).json(&payload)
            })
            .await?;

        if !response.ok {
            return Err(rejection(response.error));
        }

        let message_id = response
            .ts
            .filter(|ts| !ts.trim().is_empty())
            .ok_or_else(|| SendError::Rejected("chat.postMessage returned no ts".to_owned()))?;
        Ok(PostedMessage { channel: response.channel.unwrap_or_else(|| channel.to_owned()), message_id })
    }
}

fn post_message_payload(channel: &str, text: &str, thread_ts: Option<&str>) -> Value {
    let mut payload = json!({
        "channel": channel,
        "text": text,
        "unfurl_links": false,
        "unfurl_media": false,
    });
    if let Some(thread_ts) = thread_ts.map(str::trim).filter(|value| !value.is_empty()) {
        payload["thread_ts"] = Value::String(thread_ts.to_owned());
    }
    payload
}

fn rejection(error: Option<String>) -> SendError {
    let error = error.unwrap_or_else(|| "unknown_error".to_owned());
    if error == "ratelimited" || error == "rate_limited" {
        SendError::RateLimited { retry_after_secs: None }
    } else {
        SendError::Rejected(error)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let seconds = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
