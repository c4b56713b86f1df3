use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use thiserror::Error;

use crate::parser::parse_fields;
use crate::schema::OutputSchema;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("schema `{schema}` could not be parsed: missing {missing:?}")]
    Schema { schema: String, missing: Vec<String> },
    #[error("generation backend failed: {0}")]
    Backend(String),
    #[error("generation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl GenerationError {
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "schema_mismatch",
            Self::Backend(_) => "backend",
            Self::Timeout { .. } => "timeout",
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub instructions: String,
    pub input: String,
    pub correlation_id: String,
}

impl GenerationRequest {
    pub fn new(
        instructions: impl Into<String>,
        input: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Field values extracted for one schema, all rendered as text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructuredOutput {
    pub schema: String,
    pub fields: BTreeMap<String, String>,
}

impl StructuredOutput {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredOutput, GenerationError>;
}

/// Prompts a plain completion client for a JSON object and parses it strictly.
pub struct StructuredGenerator<C> {
    client: C,
}

impl<C> StructuredGenerator<C>
where
    C: LlmClient,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> GenerationBackend for StructuredGenerator<C>
where
    C: LlmClient,
{
    async fn generate(
        &self,
        request: &GenerationRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredOutput, GenerationError> {
        let prompt = render_prompt(request, schema);
        let raw = self.client.complete(&prompt).await?;
        parse_fields(&raw, schema)
    }
}

pub fn render_prompt(request: &GenerationRequest, schema: &OutputSchema) -> String {
    let mut prompt = String::new();
    let instructions = request.instructions.trim();
    if !instructions.is_empty() {
        prompt.push_str(instructions);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Question:\n");
    prompt.push_str(request.input.trim());
    prompt.push_str("\n\nRespond with one JSON object and nothing else. ");
    prompt.push_str("Every field below is required and must be a string:\n");
    for field in &schema.fields {
        let _ = writeln!(prompt, "- \"{}\": {}", field.name, field.description);
    }

    let shape = schema
        .fields
        .iter()
        .map(|field| format!("\"{}\": \"...\"", field.name))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = write!(prompt, "\nShape: {{{shape}}}");
    prompt
}
