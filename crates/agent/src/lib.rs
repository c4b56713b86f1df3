//! Agent Runtime - structured answer generation for pipeline questions
//!
//! This crate turns a free-text question into a deliverable answer:
//! - Declares the output fields a generation step must fill (`schema`)
//! - Extracts those fields strictly from a raw completion (`parser`)
//! - Talks to OpenRouter, OpenAI, or Ollama over the chat-completions API (`openai`)
//! - Retries once with a reduced schema when the full parse fails (`fallback`)
//!
//! # Architecture
//!
//! 1. **Prompting** (`llm`) - `StructuredGenerator` renders the schema into the prompt
//! 2. **Parsing** (`parser`) - every declared field is required, optional or not
//! 3. **Fallback** (`fallback`) - `AttemptingFull` → `AttemptingReduced` → `Succeeded` | `Failed`
//! 4. **Composition** (`runtime`) - secondary fields are appended beneath the answer
//!
//! The primary `answer` field always reaches the user, even when the model
//! drops the secondary fields of a long reply.

pub mod fallback;
pub mod llm;
pub mod openai;
pub mod parser;
pub mod runtime;
pub mod schema;

pub use fallback::{generate_with_fallback, FallbackOutcome, FallbackPath, FallbackState};
pub use llm::{
    GenerationBackend, GenerationError, GenerationRequest, LlmClient, StructuredGenerator,
    StructuredOutput,
};
pub use openai::OpenAiCompatibleClient;
pub use runtime::AgentRuntime;
pub use schema::{OutputField, OutputSchema};
