use async_trait::async_trait;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub message_id: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("send timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("rate limited by chat transport")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("chat transport rejected the message: {0}")]
    Rejected(String),
    #[error("network failure: {0}")]
    Network(String),
}

impl SendError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected(_) => "rejected",
            Self::Network(_) => "network",
        }
    }
}

/// Outbound half of the chat transport. `thread_ts` nests the message under an
/// existing message when set.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage, SendError>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{ChatTransport, PostedMessage, SendError};

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) struct PostedCall {
        pub(crate) channel: String,
        pub(crate) text: String,
        pub(crate) thread_ts: Option<String>,
    }

    /// Records every post. Calls are numbered from 1; scripted failures and
    /// delays are keyed by that number.
    #[derive(Default)]
    pub(crate) struct ScriptedChatTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        failures: HashMap<usize, SendError>,
        delays: HashMap<usize, Duration>,
        calls: Vec<PostedCall>,
    }

    impl ScriptedChatTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn failing(calls: &[(usize, SendError)]) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    failures: calls.iter().cloned().collect(),
                    ..ScriptedState::default()
                }),
            }
        }

        pub(crate) fn delayed(call: usize, delay: Duration) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    delays: HashMap::from([(call, delay)]),
                    ..ScriptedState::default()
                }),
            }
        }

        pub(crate) async fn calls(&self) -> Vec<PostedCall> {
            self.state.lock().await.calls.clone()
        }

        pub(crate) fn message_id(call: usize) -> String {
            format!("1730000000.{call:06}")
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedChatTransport {
        async fn post_message(
            &self,
            channel: &str,
            text: &str,
            thread_ts: Option<&str>,
        ) -> Result<PostedMessage, SendError> {
            let (call, delay, failure) = {
                let mut state = self.state.lock().await;
                state.calls.push(PostedCall {
                    channel: channel.to_owned(),
                    text: text.to_owned(),
                    thread_ts: thread_ts.map(str::to_owned),
                });
                let call = state.calls.len();
                (call, state.delays.get(&call).copied(), state.failures.get(&call).cloned())
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match failure {
                Some(error) => Err(error),
                None => Ok(PostedMessage {
                    channel: channel.to_owned(),
                    message_id: Self::message_id(call),
                }),
            }
        }
    }
}
