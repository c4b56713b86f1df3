//! Ordered, threaded delivery of a multi-part answer.
//!
//! Parts go out one at a time. The first delivered part becomes the thread
//! root unless the conversation is already threaded. A failed part is logged
//! and skipped; the rest still go out.

use std::sync::Arc;
use std::time::Duration;

use leadflow_core::config::DeliveryConfig;
use leadflow_core::MessageChunk;
use serde::Serialize;
use tracing::{info, warn};

use crate::transport::{ChatTransport, SendError};

pub const DEFAULT_PACING_MS: u64 = 500;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 8_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenderPolicy {
    pub pacing: Duration,
    pub send_timeout: Duration,
}

impl Default for SenderPolicy {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

impl SenderPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            pacing: Duration::from_millis(config.pacing_ms),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartOutcome {
    Delivered { message_id: String },
    Failed { error: String, kind: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartDelivery {
    pub chunk: MessageChunk,
    pub outcome: PartOutcome,
}

impl PartDelivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, PartOutcome::Delivered { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub channel: String,
    pub thread_root: Option<String>,
    pub parts: Vec<PartDelivery>,
}

impl DeliveryReport {
    pub fn delivered_ordinals(&self) -> Vec<usize> {
        self.parts
            .iter()
            .filter(|part| part.is_delivered())
            .map(|part| part.chunk.ordinal)
            .collect()
    }

    pub fn failed_ordinals(&self) -> Vec<usize> {
        self.parts
            .iter()
            .filter(|part| !part.is_delivered())
            .map(|part| part.chunk.ordinal)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(PartDelivery::is_delivered)
    }

    pub fn is_total_failure(&self) -> bool {
        !self.parts.is_empty() && !self.parts.iter().any(PartDelivery::is_delivered)
    }

    /// A multi-part answer whose parts could not be threaded together.
    pub fn is_degraded(&self) -> bool {
        self.parts.len() > 1 && self.thread_root.is_none()
    }
}

pub struct ThreadedSender {
    transport: Arc<dyn ChatTransport>,
    policy: SenderPolicy,
}

impl ThreadedSender {
    pub fn new(transport: Arc<dyn ChatTransport>, policy: SenderPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> SenderPolicy {
        self.policy
    }

    /// Sends `bodies` in order. `parent` threads every part under an existing
    /// message; without it the first delivered part's id becomes the root.
    pub async fn send(
        &self,
        bodies: &[String],
        channel: &str,
        parent: Option<&str>,
    ) -> DeliveryReport {
        let mut thread_root = parent.map(str::to_owned);
        let root_given = thread_root.is_some();
        let mut parts = Vec::with_capacity(bodies.len());

        let chunks = MessageChunk::sequence(bodies.iter().cloned());
        for (index, mut chunk) in chunks.into_iter().enumerate() {
            if index > 0 && !self.policy.pacing.is_zero() {
                tokio::time::sleep(self.policy.pacing).await;
            }

            chunk.thread_parent_id = thread_root.clone();
            let outcome = match self.post(channel, &chunk).await {
                Ok(message_id) => {
                    if index == 0 && !root_given {
                        thread_root = Some(message_id.clone());
                    }
                    PartOutcome::Delivered { message_id }
                }
                Err(error) => {
                    warn!(
                        event_name = "delivery.part.failed",
                        channel_id = %channel,
                        thread_id = thread_root.as_deref().unwrap_or(""),
                        ordinal = chunk.ordinal,
                        total = chunk.total,
                        failure_kind = error.kind(),
                        error = %error,
                        "message part failed, continuing with the rest"
                    );
                    PartOutcome::Failed { kind: error.kind(), error: error.to_string() }
                }
            };
            parts.push(PartDelivery { chunk, outcome });
        }

        let report = DeliveryReport { channel: channel.to_owned(), thread_root, parts };
        info!(
            event_name = "delivery.completed",
            channel_id = %channel,
            thread_id = report.thread_root.as_deref().unwrap_or(""),
            total = report.parts.len(),
            delivered = ?report.delivered_ordinals(),
            failed = ?report.failed_ordinals(),
            degraded = report.is_degraded(),
            "multi-part delivery finished"
        );
        report
    }

    async fn post(&self, channel: &str, chunk: &MessageChunk) -> Result<String, SendError> {
        let text = chunk.render();
        let send = self.transport.post_message(channel, &text, chunk.thread_parent_id.as_deref());
        match tokio::time::timeout(self.policy.send_timeout, send).await {
            Ok(result) => result.map(|posted| posted.message_id),
            Err(_) => Err(SendError::Timeout {
                after_ms: u64::try_from(self.policy.send_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
