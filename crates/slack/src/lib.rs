//! Slack Integration - event intake and threaded answer delivery
//!
//! This crate connects the agent runtime to Slack:
//! - **Events** (`events`) - envelope model, event parsing, dedup-gated dispatcher
//! - **Reply** (`reply`) - question → answer → chunks → thread, never silent
//! - **Sender** (`sender`) - ordered multi-part delivery with pacing and per-part timeouts
//! - **Transport** (`transport`, `client`) - `chat.postMessage` with a small retry budget
//! - **Socket Mode** (`socket`) - websocket event loop with reconnection logic
//! - **Signatures** (`signature`) - Events API request verification
//!
//! # Architecture
//!
//! ```text
//! Socket Mode / Events API → EventDispatcher (dedup gate) → ReplyHandler
//!                                                              ↓
//!                     Slack thread ← ThreadedSender ← chunker ← Agent Runtime
//! ```
//!
//! # Key Types
//!
//! - `SocketModeRunner` - WebSocket event loop with reconnection logic
//! - `EventDispatcher` - Drops redelivered events, routes the rest to handlers
//! - `ThreadedSender` - Sends parts in order, threading parts 2..N under part 1
//! - `ConversationService` - Trait the server implements to produce answers

pub mod client;
pub mod events;
pub mod reply;
pub mod sender;
pub mod signature;
pub mod socket;
pub mod transport;

pub use client::{RetryPolicy, SlackWebClient};
pub use events::{
    EventContext, EventDispatcher, EventHandler, HandlerResult, MessageEvent, SlackEnvelope,
    SlackEvent,
};
pub use reply::{ConversationService, ReplyHandler};
pub use sender::{DeliveryReport, PartOutcome, SenderPolicy, ThreadedSender};
pub use transport::{ChatTransport, PostedMessage, SendError};
