use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::client::SlackWebClient;
use crate::events::{EventContext, EventDispatcher, SlackEnvelope, SlackEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error("slack asked for a reconnect: {0}")]
    ReconnectRequested(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
struct SocketFrame {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    retry_attempt: u32,
    #[serde(default)]
    reason: Option<String>,
}

/// Socket Mode over a websocket URL obtained from `apps.connections.open`.
pub struct SlackSocketTransport {
    web: SlackWebClient,
    app_token: SecretString,
    sink: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    source: Mutex<Option<SplitStream<WsStream>>>,
}

impl SlackSocketTransport {
    pub fn new(web: SlackWebClient, app_token: SecretString) -> Self {
        Self { web, app_token, sink: Mutex::new(None), source: Mutex::new(None) }
    }
}

#[async_trait]
impl SocketTransport for SlackSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .web
            .open_socket_url(&self.app_token)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);
        *self.source.lock().await = Some(source);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.source.lock().await;
        let Some(source) = guard.as_mut() else {
            return Err(TransportError::Receive("socket is not connected".to_owned()));
        };

        loop {
            let Some(message) = source.next().await else {
                return Ok(None);
            };
            let message = message.map_err(|error| TransportError::Receive(error.to_string()))?;
            if matches!(message, WsMessage::Close(_)) {
                return Ok(None);
            }
            let Some(frame) = parse_socket_frame(message)? else {
                continue;
            };
            if let Some(envelope) = envelope_from_frame(frame)? {
                return Ok(Some(envelope));
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(TransportError::Acknowledge("socket is not connected".to_owned()));
        };
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        sink.send(WsMessage::Text(ack.into()))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.source.lock().await.take();
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Ok(());
        };
        sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

fn parse_socket_frame(message: WsMessage) -> Result<Option<SocketFrame>, TransportError> {
    let text = match message {
        WsMessage::Text(text) => text.as_str().to_owned(),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec())
            .map_err(|error| TransportError::Receive(format!("invalid utf-8 payload: {error}")))?,
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None)
        }
    };
    serde_json::from_str::<SocketFrame>(&text)
        .map(Some)
        .map_err(|error| TransportError::Receive(format!("unparseable socket frame: {error}")))
}

/// `hello` frames carry nothing to handle. Interactive and slash-command
/// envelopes still need an ack, so they come back as unsupported events.
fn envelope_from_frame(frame: SocketFrame) -> Result<Option<SlackEnvelope>, TransportError> {
    match frame.frame_type.as_str() {
        "hello" => Ok(None),
        "disconnect" => Err(TransportError::ReconnectRequested(
            frame.reason.unwrap_or_else(|| "unspecified".to_owned()),
        )),
        _ => {
            let Some(envelope_id) = frame.envelope_id.filter(|id| !id.trim().is_empty()) else {
                debug!(frame_type = %frame.frame_type, "ignoring socket frame without envelope id");
                return Ok(None);
            };
            if frame.frame_type == "events_api" {
                return Ok(Some(SlackEnvelope::from_event_callback(
                    &envelope_id,
                    &frame.payload,
                    frame.retry_attempt,
                )));
            }
            Ok(Some(SlackEnvelope {
                envelope_id,
                event_id: None,
                retry_attempt: frame.retry_attempt,
                event: SlackEvent::Unsupported { event_type: frame.frame_type },
            }))
        }
    }
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: Arc<EventDispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    /// Runs until the reconnect budget is spent. A closed stream is not an
    /// exit; the runner opens a fresh connection.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0_u32;
        loop {
            match self.connect_and_pump(&mut attempt).await {
                Ok(()) => {
                    info!(
                        event_name = "ingress.slack.stream_closed",
                        "socket stream closed, reconnecting"
                    );
                    let delay = self.reconnect_policy.backoff(0);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(TransportError::ReconnectRequested(reason)) => {
                    info!(
                        event_name = "ingress.slack.reconnect_requested",
                        reason = %reason,
                        "slack requested a socket refresh, reconnecting"
                    );
                    attempt = 0;
                }
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// A successful connect resets `attempt`, so only consecutive failures
    /// count against the budget.
    async fn connect_and_pump(&self, attempt: &mut u32) -> Result<(), TransportError> {
        info!(attempt = *attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        info!(attempt = *attempt, "socket mode transport connected");
        *attempt = 0;

        let mut in_flight = JoinSet::new();
        let result = self.pump(&mut in_flight).await;
        while in_flight.join_next().await.is_some() {}

        match result {
            Ok(()) => self.transport.disconnect().await,
            Err(error @ TransportError::ReconnectRequested(_)) => {
                if let Err(disconnect_error) = self.transport.disconnect().await {
                    debug!(error = %disconnect_error, "disconnect before reconnect failed");
                }
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    async fn pump(&self, in_flight: &mut JoinSet<()>) -> Result<(), TransportError> {
        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                return Ok(());
            };
            let (channel_id, thread_id) = correlation_fields(&envelope);
            let correlation_id = envelope.dedup_key().to_owned();

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %correlation_id,
                channel_id = channel_id.as_deref().unwrap_or("unknown"),
                thread_id = thread_id.as_deref().unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %correlation_id,
                    channel_id = channel_id.as_deref().unwrap_or("unknown"),
                    thread_id = thread_id.as_deref().unwrap_or("unknown"),
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %correlation_id,
                    channel_id = channel_id.as_deref().unwrap_or("unknown"),
                    thread_id = thread_id.as_deref().unwrap_or("unknown"),
                    "acknowledged slack envelope"
                );
            }

            if !self.dispatcher.admit(&envelope) {
                continue;
            }

            let dispatcher = self.dispatcher.clone();
            in_flight.spawn(async move {
                let context = EventContext { correlation_id: correlation_id.clone() };
                if let Err(error) = dispatcher.dispatch_admitted(&envelope, &context).await {
                    warn!(
                        envelope_id = %envelope.envelope_id,
                        correlation_id = %correlation_id,
                        channel_id = channel_id.as_deref().unwrap_or("unknown"),
                        thread_id = thread_id.as_deref().unwrap_or("unknown"),
                        error = %error,
                        "event dispatch failed; continuing socket loop"
                    );
                }
            });
            while in_flight.try_join_next().is_some() {}
        }
    }
}

fn correlation_fields(envelope: &SlackEnvelope) -> (Option<String>, Option<String>) {
    match envelope.event.message() {
        Some(event) => (
            Some(event.channel_id.clone()),
            Some(event.thread_ts.clone().unwrap_or_else(|| event.ts.clone())),
        ),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::{
        envelope_from_frame, parse_socket_frame, ReconnectPolicy, SocketModeRunner,
        SocketTransport, TransportError,
    };
    use crate::events::{
        EventContext, EventDispatcher, EventHandler, EventHandlerError, HandlerResult,
        MessageEvent, SlackEnvelope, SlackEvent, SlackEventType,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use leadflow_core::{DedupCache, DedupSettings, ManualClock};
    use serde_json::json;
    use tokio::sync::Mutex;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SlackEnvelope>, TransportError>>,
        disconnect_results: VecDeque<Result<(), TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SlackEnvelope>, TransportError>>,
            disconnect_results: Vec<Result<(), TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    disconnect_results: disconnect_results.into(),
                    connect_attempts: 0,
                    acknowledgements: Vec::new(),
                    disconnect_calls: 0,
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state
                .connect_results
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".to_owned())))
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            state.disconnect_results.pop_front().unwrap_or(Ok(()))
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        handled: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EventHandler for Arc<CountingHandler> {
        fn event_types(&self) -> &'static [SlackEventType] {
            &[SlackEventType::AppMention]
        }

        async fn handle(
            &self,
            envelope: &SlackEnvelope,
            ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            let seen = (envelope.envelope_id.clone(), ctx.correlation_id.clone());
            self.handled.lock().await.push(seen);
            Ok(HandlerResult::Processed)
        }
    }

    fn unsupported(envelope_id: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: envelope_id.to_owned(),
            event_id: None,
            retry_attempt: 0,
            event: SlackEvent::Unsupported { event_type: "test".to_owned() },
        }
    }

    fn mention(envelope_id: &str, event_id: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: envelope_id.to_owned(),
            event_id: Some(event_id.to_owned()),
            retry_attempt: 0,
            event: SlackEvent::AppMention(MessageEvent {
                channel_id: "C1".to_owned(),
                ts: "1730000000.000100".to_owned(),
                text: "<@UBOT> hi".to_owned(),
                ..MessageEvent::default()
            }),
        }
    }

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(unsupported("env-1"))), Ok(None)],
            vec![Ok(())],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), Arc::new(EventDispatcher::new()), no_delay(2));

        runner.start().await.expect("runner should not fail");

        // Two scripted connects, then three failures spend the budget.
        assert_eq!(transport.connect_attempts().await, 5);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
            vec![],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), Arc::new(EventDispatcher::new()), no_delay(2));

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn reconnect_request_does_not_consume_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                Err(TransportError::ReconnectRequested("refresh_requested".to_owned())),
                Ok(Some(unsupported("env-after-refresh"))),
                Ok(None),
            ],
            vec![],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), Arc::new(EventDispatcher::new()), no_delay(0));

        runner.start().await.expect("runner");

        assert_eq!(transport.connect_attempts().await, 3);
        assert_eq!(transport.disconnect_calls().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-after-refresh"]);
    }

    #[tokio::test]
    async fn redelivered_envelopes_are_acked_but_handled_once() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![Ok(Some(mention("env-1", "Ev-7"))), Ok(Some(mention("env-2", "Ev-7"))), Ok(None)],
            vec![],
        ));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dedup = Arc::new(DedupCache::new(
            DedupSettings { expiry_secs: 300, max_entries: 100 },
            clock,
        ));
        let handler = Arc::new(CountingHandler::default());
        let mut dispatcher = EventDispatcher::new().with_dedup(dedup);
        dispatcher.register(handler.clone());

        let runner = SocketModeRunner::new(transport.clone(), Arc::new(dispatcher), no_delay(0));
        runner.start().await.expect("runner");

        assert_eq!(transport.acknowledgements().await, vec!["env-1", "env-2"]);
        assert_eq!(*handler.handled.lock().await, vec![("env-1".to_owned(), "Ev-7".to_owned())]);
    }

    #[tokio::test]
    async fn closed_stream_reconnects_and_keeps_handling_events() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                Ok(Some(mention("env-1", "Ev-1"))),
                Ok(None),
                Ok(Some(mention("env-2", "Ev-2"))),
                Ok(None),
            ],
            vec![],
        ));
        let handler = Arc::new(CountingHandler::default());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(handler.clone());

        let runner = SocketModeRunner::new(transport.clone(), Arc::new(dispatcher), no_delay(0));
        runner.start().await.expect("runner");

        assert_eq!(transport.connect_attempts().await, 3);
        assert_eq!(transport.disconnect_calls().await, 2);
        let handled = handler.handled.lock().await;
        assert_eq!(handled.len(), 2);
        assert_eq!(handled[1].0, "env-2");
    }

    #[tokio::test]
    async fn healthy_connections_restore_the_retry_budget() {
        let mut envelopes = Vec::new();
        for index in 1..=4 {
            envelopes.push(Ok(Some(mention(&format!("env-{index}"), &format!("Ev-{index}")))));
            envelopes.push(Err(TransportError::Receive(format!("reset by peer {index}"))));
        }
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(()), Ok(()), Ok(())],
            envelopes,
            vec![],
        ));
        let handler = Arc::new(CountingHandler::default());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(handler.clone());

        let runner = SocketModeRunner::new(transport.clone(), Arc::new(dispatcher), no_delay(2));
        runner.start().await.expect("runner");

        assert_eq!(handler.handled.lock().await.len(), 4);
        // Four healthy connects, then two failures after the last drop.
        assert_eq!(transport.connect_attempts().await, 6);
    }

    #[test]
    fn extracts_channel_and_thread_correlation_fields() {
        let mut envelope = mention("env-2", "Ev-2");
        if let SlackEvent::AppMention(event) = &mut envelope.event {
            event.thread_ts = Some("1730000000.000001".to_owned());
        }

        let (channel_id, thread_id) = super::correlation_fields(&envelope);
        assert_eq!(channel_id.as_deref(), Some("C1"));
        assert_eq!(thread_id.as_deref(), Some("1730000000.000001"));
        assert_eq!(super::correlation_fields(&unsupported("env-3")), (None, None));
    }

    #[test]
    fn socket_frames_map_to_envelopes() {
        let events_api = json!({
            "envelope_id": "57d6c7f2",
            "type": "events_api",
            "retry_attempt": 1,
            "payload": {
                "type": "event_callback",
                "event_id": "Ev08",
                "event": {
                    "type": "app_mention",
                    "channel": "C1",
                    "user": "U1",
                    "text": "<@UBOT> status",
                    "ts": "1730000000.000300"
                }
            }
        })
        .to_string();

        let frame = parse_socket_frame(WsMessage::Text(events_api.into()))
            .expect("parse")
            .expect("frame");
        let envelope = envelope_from_frame(frame).expect("envelope").expect("some");

        assert_eq!(envelope.envelope_id, "57d6c7f2");
        assert_eq!(envelope.dedup_key(), "Ev08");
        assert_eq!(envelope.retry_attempt, 1);
        assert_eq!(envelope.event.event_type(), SlackEventType::AppMention);
    }

    #[test]
    fn hello_ping_and_disconnect_frames_are_not_envelopes() {
        let hello = parse_socket_frame(WsMessage::Text(
            json!({ "type": "hello", "num_connections": 1 }).to_string().into(),
        ))
        .expect("parse")
        .expect("frame");
        assert_eq!(envelope_from_frame(hello), Ok(None));

        assert!(parse_socket_frame(WsMessage::Ping(Vec::new().into())).expect("ping").is_none());

        let disconnect = parse_socket_frame(WsMessage::Text(
            json!({ "type": "disconnect", "reason": "refresh_requested" }).to_string().into(),
        ))
        .expect("parse")
        .expect("frame");
        assert_eq!(
            envelope_from_frame(disconnect),
            Err(TransportError::ReconnectRequested("refresh_requested".to_owned()))
        );
    }

    #[test]
    fn interactive_envelopes_are_acked_as_unsupported() {
        let frame = parse_socket_frame(WsMessage::Text(
            json!({ "envelope_id": "e-9", "type": "interactive", "payload": {} }).to_string().into(),
        ))
        .expect("parse")
        .expect("frame");

        let envelope = envelope_from_frame(frame).expect("envelope").expect("some");

        assert_eq!(envelope.envelope_id, "e-9");
        assert_eq!(
            envelope.event,
            SlackEvent::Unsupported { event_type: "interactive".to_owned() }
        );
    }
}
