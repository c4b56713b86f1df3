//! Events API intake (`POST /slack/events`).
//!
//! Slack retries a delivery that is not acknowledged within three seconds, so
//! the handler only verifies, parses and runs the dedup gate before answering
//! `200`. The reply pipeline runs on its own task.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use leadflow_slack::events::{EventContext, EventDispatcher, SlackEnvelope};
use leadflow_slack::signature::{verify_slack_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

#[derive(Clone)]
pub struct WebhookState {
    dispatcher: Arc<EventDispatcher>,
    signing_secret: Option<SecretString>,
}

impl WebhookState {
    pub fn new(dispatcher: Arc<EventDispatcher>, signing_secret: Option<SecretString>) -> Self {
        Self { dispatcher, signing_secret }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/slack/events", post(slack_events)).with_state(state)
}

pub async fn slack_events(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.signing_secret {
        let timestamp = header_str(&headers, TIMESTAMP_HEADER).unwrap_or_default();
        let signature = header_str(&headers, SIGNATURE_HEADER).unwrap_or_default();
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        if let Err(error) =
            verify_slack_signature(secret.expose_secret(), timestamp, &body, signature, now)
        {
            warn!(
                event_name = "ingress.slack.signature_rejected",
                correlation_id = "unverified",
                error = %error,
                "rejected unsigned or stale slack request"
            );
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "ingress.slack.payload_invalid",
                correlation_id = "unparsed",
                error = %error,
                "slack request body is not json"
            );
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match payload.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = payload.get("challenge").and_then(Value::as_str).unwrap_or_default();
            Json(json!({ "challenge": challenge })).into_response()
        }
        Some("event_callback") => {
            accept_event_callback(&state, &headers, &payload);
            StatusCode::OK.into_response()
        }
        other => {
            info!(
                event_name = "ingress.slack.payload_ignored",
                correlation_id = "unknown",
                payload_type = other.unwrap_or("missing"),
                "ignoring slack payload"
            );
            StatusCode::OK.into_response()
        }
    }
}

fn accept_event_callback(state: &WebhookState, headers: &HeaderMap, payload: &Value) {
    let retry_attempt =
        header_str(headers, RETRY_NUM_HEADER).and_then(|raw| raw.parse::<u32>().ok()).unwrap_or(0);
    let event_id = payload.get("event_id").and_then(Value::as_str).unwrap_or_default();
    let envelope = SlackEnvelope::from_event_callback(event_id, payload, retry_attempt);

    info!(
        event_name = "ingress.slack.event_received",
        correlation_id = %envelope.dedup_key(),
        event_type = ?envelope.event.event_type(),
        retry_attempt,
        "received slack event callback"
    );

    if !state.dispatcher.admit(&envelope) {
        return;
    }

    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let context = EventContext::for_envelope(&envelope);
        if let Err(error) = dispatcher.dispatch_admitted(&envelope, &context).await {
            warn!(
                event_name = "ingress.slack.dispatch_failed",
                correlation_id = %context.correlation_id,
                error = %error,
                "event dispatch failed"
            );
        }
    });
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}
