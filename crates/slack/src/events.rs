use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use leadflow_core::DedupCache;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::sender::DeliveryReport;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event_id: Option<String>,
    pub retry_attempt: u32,
    pub event: SlackEvent,
}

impl SlackEnvelope {
    /// Key the dedup gate records. Slack keeps `event_id` stable across
    /// redeliveries while the envelope id changes.
    pub fn dedup_key(&self) -> &str {
        self.event_id.as_deref().filter(|id| !id.trim().is_empty()).unwrap_or(&self.envelope_id)
    }

    /// Builds an envelope from an Events API `event_callback` body.
    pub fn from_event_callback(envelope_id: &str, payload: &Value, retry_attempt: u32) -> Self {
        let event_id = payload
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        let event = payload.get("event").map(parse_event).unwrap_or_else(|| {
            SlackEvent::Unsupported { event_type: "missing_event".to_owned() }
        });

        Self { envelope_id: envelope_id.to_owned(), event_id, retry_attempt, event }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(MessageEvent),
    AppMention(MessageEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    pub fn message(&self) -> Option<&MessageEvent> {
        match self {
            Self::Message(event) | Self::AppMention(event) => Some(event),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    AppMention,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    /// `im`, `channel`, `group` or `mpim` for `message` events.
    pub channel_type: Option<String>,
    pub bot_id: Option<String>,
}

impl MessageEvent {
    pub fn is_from_bot(&self) -> bool {
        self.bot_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
    }
}

/// Maps the inner `event` object of a callback. Edited, deleted and other
/// subtyped messages are not questions and come back as `Unsupported`.
pub fn parse_event(event: &Value) -> SlackEvent {
    let event_type = string_field(event, "type").unwrap_or_default();
    if let Some(subtype) = string_field(event, "subtype") {
        return SlackEvent::Unsupported { event_type: format!("{event_type}.{subtype}") };
    }

    let message = || MessageEvent {
        channel_id: string_field(event, "channel").unwrap_or_default(),
        user_id: string_field(event, "user").unwrap_or_default(),
        text: string_field(event, "text").unwrap_or_default(),
        ts: string_field(event, "ts").unwrap_or_default(),
        thread_ts: string_field(event, "thread_ts"),
        channel_type: string_field(event, "channel_type"),
        bot_id: string_field(event, "bot_id"),
    };

    match event_type.as_str() {
        "message" => SlackEvent::Message(message()),
        "app_mention" => SlackEvent::AppMention(message()),
        "" => SlackEvent::Unsupported { event_type: "unknown".to_owned() },
        _ => SlackEvent::Unsupported { event_type },
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl EventContext {
    pub fn for_envelope(envelope: &SlackEnvelope) -> Self {
        Self { correlation_id: envelope.dedup_key().to_owned() }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Delivered(DeliveryReport),
    Processed,
    Ignored,
    Duplicate,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("reply could not be delivered: {0}")]
    Delivery(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_types(&self) -> &'static [SlackEventType];
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
    dedup: Option<Arc<DedupCache>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedup(mut self, dedup: Arc<DedupCache>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        for event_type in handler.event_types() {
            self.handlers.insert(*event_type, handler.clone());
        }
    }

    /// Runs the dedup gate. `false` means the event was already handled and
    /// must not be processed again.
    pub fn admit(&self, envelope: &SlackEnvelope) -> bool {
        let Some(dedup) = &self.dedup else {
            return true;
        };

        let admitted = dedup.admit(envelope.dedup_key());
        if !admitted {
            info!(
                event_name = "ingress.slack.duplicate_suppressed",
                correlation_id = %envelope.dedup_key(),
                envelope_id = %envelope.envelope_id,
                retry_attempt = envelope.retry_attempt,
                "duplicate slack event suppressed"
            );
        }
        admitted
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        if !self.admit(envelope) {
            return Ok(HandlerResult::Duplicate);
        }
        self.dispatch_admitted(envelope, ctx).await
    }

    /// Routes an event that already passed [`EventDispatcher::admit`].
    pub async fn dispatch_admitted(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn dedup(&self) -> Option<&Arc<DedupCache>> {
        self.dedup.as_ref()
    }
}
