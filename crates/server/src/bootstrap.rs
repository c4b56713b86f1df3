use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use leadflow_agent::{AgentRuntime, GenerationError, OpenAiCompatibleClient, StructuredGenerator};
use leadflow_core::config::{AppConfig, ConfigError, LoadOptions};
use leadflow_core::DedupCache;
use leadflow_slack::socket::{ReconnectPolicy, SlackSocketTransport, SocketModeRunner};
use leadflow_slack::{
    EventDispatcher, ReplyHandler, SendError, SenderPolicy, SlackWebClient, ThreadedSender,
};
use thiserror::Error;
use tracing::info;

use crate::conversation::AgentConversation;
use crate::health::{self, HealthState};
use crate::webhook::{self, WebhookState};

pub struct Application {
    pub config: AppConfig,
    pub dedup: Arc<DedupCache>,
    pub dispatcher: Arc<EventDispatcher>,
    pub slack_runner: Option<SocketModeRunner>,
}

impl Application {
    /// Events API intake plus `/health`. Served in both transport modes.
    pub fn router(&self) -> Router {
        let webhook_state =
            WebhookState::new(self.dispatcher.clone(), self.config.slack.signing_secret.clone());
        let health_state = HealthState {
            dedup: self.dedup.clone(),
            llm_provider: self.config.llm.provider.as_str(),
            llm_model: self.config.llm.model.clone(),
            socket_mode: self.slack_runner.is_some(),
        };
        webhook::router(webhook_state).merge(health::router(health_state))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.config.server.graceful_shutdown_secs)
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("llm client setup failed: {0}")]
    LlmClient(#[source] GenerationError),
    #[error("slack client setup failed: {0}")]
    SlackClient(#[source] SendError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    config.validate()?;

    let dedup = Arc::new(DedupCache::with_system_clock(config.dedup.settings()));

    let llm_client =
        OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::LlmClient)?;
    info!(
        event_name = "system.bootstrap.llm_configured",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = llm_client.model(),
        base_url = llm_client.base_url(),
        "llm backend configured"
    );
    let runtime = Arc::new(AgentRuntime::new(Arc::new(StructuredGenerator::new(llm_client))));

    let web_client =
        SlackWebClient::from_config(&config.slack).map_err(BootstrapError::SlackClient)?;
    let sender = Arc::new(ThreadedSender::new(
        Arc::new(web_client.clone()),
        SenderPolicy::from_config(&config.delivery),
    ));
    let reply_handler = ReplyHandler::new(
        AgentConversation::new(runtime),
        sender,
        config.delivery.chunk_options(),
    );

    let mut dispatcher = EventDispatcher::new().with_dedup(dedup.clone());
    dispatcher.register(reply_handler);
    let dispatcher = Arc::new(dispatcher);

    let slack_runner = config.slack.app_token.clone().map(|app_token| {
        SocketModeRunner::new(
            Arc::new(SlackSocketTransport::new(web_client, app_token)),
            dispatcher.clone(),
            ReconnectPolicy::default(),
        )
    });

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        handlers = dispatcher.handler_count(),
        transport_mode = if slack_runner.is_some() { "socket" } else { "webhook" },
        "application bootstrap complete"
    );

    Ok(Application { config, dedup, dispatcher, slack_runner })
}
