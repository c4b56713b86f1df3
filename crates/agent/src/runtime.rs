use std::sync::Arc;

use leadflow_core::{ApplicationError, DomainError, GeneratedResponse};
use tracing::info;

use crate::fallback::generate_with_fallback;
use crate::llm::{GenerationBackend, GenerationRequest};
use crate::schema::{OutputField, OutputSchema};

pub const ANSWER_FIELD: &str = "answer";
pub const KEY_INSIGHTS_FIELD: &str = "key_insights";
pub const RECOMMENDED_ACTIONS_FIELD: &str = "recommended_actions";

const STRATEGY_INSTRUCTIONS: &str = "You are a sales pipeline strategist. Answer the question \
thoroughly using plain paragraphs separated by blank lines. Be concrete about deals, stages, \
and owners when the question mentions them.";

const EMPTY_ANSWER_TEXT: &str = "I couldn't put together a useful answer for that question. \
Try rephrasing it or adding a little more detail.";

pub fn strategy_schema() -> OutputSchema {
    OutputSchema::new(
        "pipeline_strategy",
        OutputField::new(ANSWER_FIELD, "the complete answer, as many paragraphs as needed"),
        [
            OutputField::new(KEY_INSIGHTS_FIELD, "two to four short insights, one per line"),
            OutputField::new(RECOMMENDED_ACTIONS_FIELD, "concrete next steps, one per line"),
        ],
    )
}

/// Answers pipeline questions through the two-tier structured generator.
pub struct AgentRuntime {
    backend: Arc<dyn GenerationBackend>,
    schema: OutputSchema,
    instructions: String,
}

impl AgentRuntime {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            schema: strategy_schema(),
            instructions: STRATEGY_INSTRUCTIONS.to_owned(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    pub async fn answer(
        &self,
        question: &str,
        correlation_id: &str,
    ) -> Result<GeneratedResponse, ApplicationError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DomainError::EmptyQuestion.into());
        }

        let request = GenerationRequest::new(&self.instructions, question, correlation_id);
        let outcome = generate_with_fallback(self.backend.as_ref(), &request, &self.schema)
            .await
            .map_err(|error| ApplicationError::Generation(error.to_string()))?;

        info!(
            event_name = "generation.answer.ready",
            correlation_id = %correlation_id,
            path = ?outcome.path,
            answer_chars = outcome.response.text.chars().count(),
            "answer generated"
        );

        Ok(compose_reply(outcome.response))
    }
}

fn compose_reply(response: GeneratedResponse) -> GeneratedResponse {
    let mut text = response.text.trim().to_owned();
    if text.is_empty() {
        text = EMPTY_ANSWER_TEXT.to_owned();
    }

    for (field, heading) in
        [(KEY_INSIGHTS_FIELD, "Key insights"), (RECOMMENDED_ACTIONS_FIELD, "Recommended actions")]
    {
        if let Some(value) = response.field(field).map(str::trim).filter(|value| !value.is_empty())
        {
            text.push_str(&format!("\n\n*{heading}*\n{value}"));
        }
    }

    GeneratedResponse::new(text, response.structured_fields)
}
