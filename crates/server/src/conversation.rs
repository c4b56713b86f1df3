use std::sync::Arc;

use async_trait::async_trait;
use leadflow_agent::AgentRuntime;
use leadflow_core::{GeneratedResponse, InterfaceError};
use leadflow_slack::events::{EventContext, MessageEvent};
use leadflow_slack::reply::ConversationService;

/// Answers Slack questions with the pipeline strategy agent.
pub struct AgentConversation {
    runtime: Arc<AgentRuntime>,
}

impl AgentConversation {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ConversationService for AgentConversation {
    async fn respond(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<GeneratedResponse>, InterfaceError> {
        self.runtime
            .answer(&event.text, &ctx.correlation_id)
            .await
            .map(Some)
            .map_err(|error| error.into_interface(ctx.correlation_id.as_str()))
    }
}
