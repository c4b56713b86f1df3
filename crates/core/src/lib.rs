//! Leadflow core - transport-agnostic delivery primitives
//!
//! - **Dedup** (`dedup`) - time-bounded gate that suppresses retried inbound events
//! - **Chunking** (`chunking`) - paragraph-aware splitting of long answers
//! - **Domain** (`domain`) - generated responses, message chunks
//! - **Config** (`config`) - layered `leadflow.toml` + `LEADFLOW_*` configuration
//!
//! Apart from reading the config file nothing here performs I/O; the Slack and
//! agent crates build on it.

pub mod chunking;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;

pub use chunking::{chunk, chunk_with, ChunkOptions, OversizePolicy};
pub use dedup::{Clock, DedupCache, DedupSettings, ManualClock, SystemClock};
pub use domain::{GeneratedResponse, MessageChunk};
pub use errors::{ApplicationError, DomainError, InterfaceError};
