//! Two-tier structured generation.
//!
//! A schema mismatch on the full schema earns exactly one retry with the
//! reduced schema. Anything else goes straight back to the caller.

use leadflow_core::GeneratedResponse;
use serde::Serialize;
use tracing::{debug, warn};

use crate::llm::{GenerationBackend, GenerationError, GenerationRequest, StructuredOutput};
use crate::schema::OutputSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackState {
    AttemptingFull,
    AttemptingReduced,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPath {
    Full,
    Reduced,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub response: GeneratedResponse,
    pub path: FallbackPath,
    pub transitions: Vec<FallbackState>,
}

impl FallbackOutcome {
    pub fn retried(&self) -> bool {
        self.path == FallbackPath::Reduced
    }
}

pub async fn generate_with_fallback(
    backend: &dyn GenerationBackend,
    request: &GenerationRequest,
    schema: &OutputSchema,
) -> Result<FallbackOutcome, GenerationError> {
    let mut transitions = vec![FallbackState::AttemptingFull];

    let full_error = match backend.generate(request, schema).await {
        Ok(output) => {
            transitions.push(FallbackState::Succeeded);
            debug!(
                event_name = "generation.full_schema.succeeded",
                correlation_id = %request.correlation_id,
                schema = %schema.name,
                "structured generation succeeded"
            );
            return Ok(FallbackOutcome {
                response: into_response(output, schema),
                path: FallbackPath::Full,
                transitions,
            });
        }
        Err(error) => error,
    };

    if !full_error.is_schema() || schema.is_reduced() {
        transitions.push(FallbackState::Failed);
        warn!(
            event_name = "generation.failed",
            correlation_id = %request.correlation_id,
            schema = %schema.name,
            failure_kind = full_error.kind(),
            transitions = ?transitions,
            error = %full_error,
            "structured generation failed without fallback"
        );
        return Err(full_error);
    }

    warn!(
        event_name = "generation.full_schema.parse_failed",
        correlation_id = %request.correlation_id,
        schema = %schema.name,
        failure_kind = full_error.kind(),
        error = %full_error,
        "full schema parse failed, retrying with reduced schema"
    );

    let reduced = schema.reduced();
    transitions.push(FallbackState::AttemptingReduced);
    match backend.generate(request, &reduced).await {
        Ok(output) => {
            transitions.push(FallbackState::Succeeded);
            let text = output.fields.get(&reduced.primary).cloned().unwrap_or_default();
            Ok(FallbackOutcome {
                response: GeneratedResponse::primary_only(text),
                path: FallbackPath::Reduced,
                transitions,
            })
        }
        Err(error) => {
            transitions.push(FallbackState::Failed);
            warn!(
                event_name = "generation.reduced_schema.failed",
                correlation_id = %request.correlation_id,
                schema = %reduced.name,
                failure_kind = error.kind(),
                transitions = ?transitions,
                error = %error,
                "reduced schema generation failed"
            );
            Err(error)
        }
    }
}

fn into_response(output: StructuredOutput, schema: &OutputSchema) -> GeneratedResponse {
    let mut fields = output.fields;
    let text = fields.remove(&schema.primary).unwrap_or_default();
    GeneratedResponse::new(text, fields)
}
