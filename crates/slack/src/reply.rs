//! Reply pipeline: question in, threaded multi-part answer out.
//!
//! The user always sees something. A generation failure posts the short
//! notice from [`InterfaceError::user_message`], and a delivery where every
//! part failed gets one attempt at a failure notice.

use std::sync::Arc;

use async_trait::async_trait;
use leadflow_core::{chunk_with, ApplicationError, ChunkOptions, GeneratedResponse, InterfaceError};
use tracing::{error, info, warn};

use crate::events::{
    EventContext, EventHandler, EventHandlerError, HandlerResult, MessageEvent, SlackEnvelope,
    SlackEvent, SlackEventType,
};
use crate::sender::ThreadedSender;

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// `Ok(None)` means there is nothing to say back.
    async fn respond(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<GeneratedResponse>, InterfaceError>;
}

pub struct ReplyHandler<S> {
    service: S,
    sender: Arc<ThreadedSender>,
    chunk_options: ChunkOptions,
}

impl<S> ReplyHandler<S>
where
    S: ConversationService,
{
    pub fn new(service: S, sender: Arc<ThreadedSender>, chunk_options: ChunkOptions) -> Self {
        Self { service, sender, chunk_options }
    }

    async fn reply(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let thread = event.thread_ts.as_deref();
        let response = match self.service.respond(event, ctx).await {
            Ok(Some(response)) => response,
            Ok(None) => return Ok(HandlerResult::Processed),
            Err(failure) => {
                warn!(
                    event_name = "reply.generation.failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %event.channel_id,
                    thread_id = thread.unwrap_or(""),
                    error = %failure,
                    "answer generation failed, posting notice"
                );
                return self.post_notice(event, ctx, failure.user_message()).await;
            }
        };

        let parts = chunk_with(&response.text, &self.chunk_options);
        if parts.iter().all(|part| part.trim().is_empty()) {
            let failure = ApplicationError::Delivery("answer has no deliverable text".to_owned())
                .into_interface(ctx.correlation_id.as_str());
            warn!(
                event_name = "reply.delivery.empty",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                thread_id = thread.unwrap_or(""),
                "answer chunked to nothing, posting notice"
            );
            return self.post_notice(event, ctx, failure.user_message()).await;
        }
        info!(
            event_name = "reply.delivery.started",
            correlation_id = %ctx.correlation_id,
            channel_id = %event.channel_id,
            thread_id = thread.unwrap_or(""),
            parts = parts.len(),
            "delivering answer"
        );
        let report = self.sender.send(&parts, &event.channel_id, thread).await;
        if !report.is_total_failure() {
            return Ok(HandlerResult::Delivered(report));
        }

        let failure = ApplicationError::Delivery(format!("all {} parts failed", parts.len()))
            .into_interface(ctx.correlation_id.as_str());
        error!(
            event_name = "reply.delivery.failed",
            correlation_id = %ctx.correlation_id,
            channel_id = %event.channel_id,
            thread_id = thread.unwrap_or(""),
            failed = ?report.failed_ordinals(),
            "every part of the answer failed to send"
        );
        self.post_notice(event, ctx, failure.user_message()).await
    }

    async fn post_notice(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
        notice: &str,
    ) -> Result<HandlerResult, EventHandlerError> {
        let thread = Some(reply_thread(event));
        let report = self.sender.send(&[notice.to_owned()], &event.channel_id, thread).await;
        if report.is_total_failure() {
            return Err(EventHandlerError::Delivery(format!(
                "failure notice for {} was not delivered",
                ctx.correlation_id
            )));
        }
        Ok(HandlerResult::Delivered(report))
    }
}

#[async_trait]
impl<S> EventHandler for ReplyHandler<S>
where
    S: ConversationService + 'static,
{
    fn event_types(&self) -> &'static [SlackEventType] {
        &[SlackEventType::Message, SlackEventType::AppMention]
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let event = match &envelope.event {
            SlackEvent::AppMention(event) => event,
            // Channel mentions also arrive as `message`; only direct messages are answered here.
            SlackEvent::Message(event) if event.is_direct_message() => event,
            _ => return Ok(HandlerResult::Ignored),
        };
        if event.is_from_bot() {
            return Ok(HandlerResult::Ignored);
        }

        let question = MessageEvent { text: strip_mentions(&event.text), ..event.clone() };
        self.reply(&question, ctx).await
    }
}

/// Removes `<@U123>` style user mentions and collapses the leftover whitespace.
pub fn strip_mentions(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        cleaned.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    cleaned.push_str(rest);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Notices always land next to the question: in its thread, or under it.
fn reply_thread(event: &MessageEvent) -> &str {
    event.thread_ts.as_deref().unwrap_or(&event.ts)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use leadflow_core::{ChunkOptions, GeneratedResponse, InterfaceError, OversizePolicy};
    use tokio::sync::Mutex;

    use super::{strip_mentions, ConversationService, ReplyHandler};
    use crate::events::{
        EventContext, EventHandler, EventHandlerError, HandlerResult, MessageEvent, SlackEnvelope,
        SlackEvent,
    };
    use crate::sender::{SenderPolicy, ThreadedSender};
    use crate::transport::fakes::ScriptedChatTransport;
    use crate::transport::SendError;

    struct ScriptedService {
        reply: Result<Option<GeneratedResponse>, InterfaceError>,
        questions: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn answering(text: &str) -> Arc<Self> {
            Self::with(Ok(Some(GeneratedResponse::primary_only(text))))
        }

        fn with(reply: Result<Option<GeneratedResponse>, InterfaceError>) -> Arc<Self> {
            Arc::new(Self { reply, questions: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ConversationService for Arc<ScriptedService> {
        async fn respond(
            &self,
            event: &MessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<GeneratedResponse>, InterfaceError> {
            self.questions.lock().await.push(event.text.clone());
            self.reply.clone()
        }
    }

    fn handler(
        service: Arc<ScriptedService>,
        transport: Arc<ScriptedChatTransport>,
        max_length: usize,
    ) -> ReplyHandler<Arc<ScriptedService>> {
        let policy = SenderPolicy { pacing: Duration::ZERO, send_timeout: Duration::from_secs(5) };
        ReplyHandler::new(
            service,
            Arc::new(ThreadedSender::new(transport, policy)),
            ChunkOptions::new(max_length, OversizePolicy::SplitOnWhitespace),
        )
    }

    fn mention(text: &str, thread_ts: Option<&str>) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "env-1".to_owned(),
            event_id: Some("Ev-1".to_owned()),
            retry_attempt: 0,
            event: SlackEvent::AppMention(MessageEvent {
                channel_id: "C9".to_owned(),
                user_id: "U1".to_owned(),
                text: text.to_owned(),
                ts: "1730000000.000050".to_owned(),
                thread_ts: thread_ts.map(str::to_owned),
                channel_type: None,
                bot_id: None,
            }),
        }
    }

    fn ctx() -> EventContext {
        EventContext { correlation_id: "Ev-1".to_owned() }
    }

    #[tokio::test]
    async fn mention_is_answered_with_threaded_parts() {
        let service = ScriptedService::answering("First paragraph here.\n\nSecond paragraph here.");
        let transport = Arc::new(ScriptedChatTransport::new());
        let handler = handler(service.clone(), transport.clone(), 25);

        let result = handler.handle(&mention("<@UBOT>  how is Q3?", None), &ctx()).await;

        let Ok(HandlerResult::Delivered(report)) = result else {
            panic!("expected delivery, got {result:?}");
        };
        assert!(report.is_complete());
        assert_eq!(*service.questions.lock().await, vec!["how is Q3?".to_owned()]);
        let calls = transport.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].text, "[Part 1/2]\nFirst paragraph here.");
        assert_eq!(calls[1].thread_ts, Some(ScriptedChatTransport::message_id(1)));
    }

    #[tokio::test]
    async fn reply_stays_in_the_users_thread() {
        let service = ScriptedService::answering("short answer");
        let transport = Arc::new(ScriptedChatTransport::new());
        let handler = handler(service, transport.clone(), 3_000);

        handler
            .handle(&mention("<@UBOT> follow up", Some("1730000000.000001")), &ctx())
            .await
            .expect("handled");

        let calls = transport.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, "short answer");
        assert_eq!(calls[0].thread_ts.as_deref(), Some("1730000000.000001"));
    }

    #[tokio::test]
    async fn generation_failure_posts_user_notice() {
        let failure = InterfaceError::ServiceUnavailable {
            message: "reduced schema parse failed".to_owned(),
            correlation_id: "Ev-1".to_owned(),
        };
        let service = ScriptedService::with(Err(failure.clone()));
        let transport = Arc::new(ScriptedChatTransport::new());
        let handler = handler(service, transport.clone(), 3_000);

        handler.handle(&mention("<@UBOT> forecast?", None), &ctx()).await.expect("handled");

        let calls = transport.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, failure.user_message());
        assert_eq!(calls[0].thread_ts.as_deref(), Some("1730000000.000050"));
    }

    #[tokio::test]
    async fn total_delivery_failure_gets_one_notice_attempt() {
        let service = ScriptedService::answering("only part");
        let transport = Arc::new(ScriptedChatTransport::failing(&[(
            1,
            SendError::Network("connection reset".to_owned()),
        )]));
        let handler = handler(service, transport.clone(), 3_000);

        let result = handler.handle(&mention("<@UBOT> status?", None), &ctx()).await;

        assert!(matches!(result, Ok(HandlerResult::Delivered(_))));
        let calls = transport.calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[1].text.starts_with("Sorry"));
    }

    #[tokio::test]
    async fn undeliverable_notice_surfaces_as_error() {
        let service = ScriptedService::answering("only part");
        let transport = Arc::new(ScriptedChatTransport::failing(&[
            (1, SendError::Rejected("not_in_channel".to_owned())),
            (2, SendError::Rejected("not_in_channel".to_owned())),
        ]));
        let handler = handler(service, transport.clone(), 3_000);

        let result = handler.handle(&mention("<@UBOT> status?", None), &ctx()).await;

        assert!(matches!(result, Err(EventHandlerError::Delivery(_))));
        assert_eq!(transport.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn bot_and_channel_messages_are_ignored() {
        let service = ScriptedService::answering("unused");
        let transport = Arc::new(ScriptedChatTransport::new());
        let handler = handler(service.clone(), transport.clone(), 3_000);

        let mut from_bot = mention("[Part 1/2]\nhello", None);
        if let SlackEvent::AppMention(event) = &mut from_bot.event {
            event.bot_id = Some("B1".to_owned());
        }
        let channel_message = SlackEnvelope {
            event: SlackEvent::Message(MessageEvent {
                channel_id: "C9".to_owned(),
                text: "<@UBOT> hi".to_owned(),
                channel_type: Some("channel".to_owned()),
                ..MessageEvent::default()
            }),
            ..mention("", None)
        };

        assert_eq!(handler.handle(&from_bot, &ctx()).await, Ok(HandlerResult::Ignored));
        assert_eq!(handler.handle(&channel_message, &ctx()).await, Ok(HandlerResult::Ignored));
        assert!(transport.calls().await.is_empty());
        assert!(service.questions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn direct_message_is_answered() {
        let service = ScriptedService::answering("hello back");
        let transport = Arc::new(ScriptedChatTransport::new());
        let handler = handler(service, transport.clone(), 3_000);
        let direct = SlackEnvelope {
            event: SlackEvent::Message(MessageEvent {
                channel_id: "D1".to_owned(),
                user_id: "U1".to_owned(),
                text: "pipeline summary please".to_owned(),
                ts: "1730000000.000070".to_owned(),
                channel_type: Some("im".to_owned()),
                ..MessageEvent::default()
            }),
            ..mention("", None)
        };

        let result = handler.handle(&direct, &ctx()).await;

        assert!(matches!(result, Ok(HandlerResult::Delivered(ref report)) if report.is_complete()));
        assert_eq!(transport.calls().await[0].channel, "D1");
    }

    #[tokio::test]
    async fn blank_answer_is_replaced_by_a_notice() {
        let service = ScriptedService::answering("      \n\n      ");
        let transport = Arc::new(ScriptedChatTransport::new());
        let handler = handler(service, transport.clone(), 4);

        let result = handler.handle(&mention("<@UBOT> anything?", None), &ctx()).await;

        assert!(matches!(result, Ok(HandlerResult::Delivered(ref report)) if report.is_complete()));
        let calls = transport.calls().await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].text.starts_with("Sorry"));
        assert_eq!(calls[0].thread_ts.as_deref(), Some("1730000000.000050"));
    }

    #[tokio::test]
    async fn nothing_to_say_is_processed_silently() {
        let service = ScriptedService::with(Ok(None));
        let transport = Arc::new(ScriptedChatTransport::new());
        let handler = handler(service, transport.clone(), 3_000);

        let result = handler.handle(&mention("<@UBOT>", None), &ctx()).await;

        assert_eq!(result, Ok(HandlerResult::Processed));
        assert!(transport.calls().await.is_empty());
    }

    #[test]
    fn mentions_are_stripped_from_questions() {
        assert_eq!(strip_mentions("<@U123ABC> what's  next?"), "what's next?");
        assert_eq!(strip_mentions("ask <@U1|bob> and <@U2>"), "ask and");
        assert_eq!(strip_mentions("broken <@U1"), "broken <@U1");
    }
}
