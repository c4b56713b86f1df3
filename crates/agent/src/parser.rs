//! Strict extraction of schema fields from a raw completion.
//!
//! The completion may wrap its JSON in prose or a markdown fence. Once an
//! object is found, every declared field must be present and non-null.
//! Optional-looking fields get no special treatment.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::llm::{GenerationError, StructuredOutput};
use crate::schema::OutputSchema;

pub fn parse_fields(raw: &str, schema: &OutputSchema) -> Result<StructuredOutput, GenerationError> {
    let Some(object) = extract_json_object(raw) else {
        return Err(GenerationError::Schema {
            schema: schema.name.clone(),
            missing: schema.field_names().into_iter().map(str::to_owned).collect(),
        });
    };

    let mut fields = BTreeMap::new();
    let mut missing = Vec::new();
    for field in &schema.fields {
        match object.get(&field.name).and_then(render_value) {
            Some(value) => {
                fields.insert(field.name.clone(), value);
            }
            None => missing.push(field.name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(GenerationError::Schema { schema: schema.name.clone(), missing });
    }

    Ok(StructuredOutput { schema: schema.name.clone(), fields })
}

pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(object) = parse_object(trimmed) {
        return Some(object);
    }

    let mut cursor = 0usize;
    while let Some(open_rel) = text[cursor..].find("```") {
        let open = cursor + open_rel;
        let after_open = &text[open + 3..];
        let header_end_rel = after_open.find('\n').unwrap_or(after_open.len());
        let header = after_open[..header_end_rel].trim();
        let block_start = (open + 3 + header_end_rel + 1).min(text.len());
        let Some(close_rel) = text[block_start..].find("```") else {
            break;
        };
        let close = block_start + close_rel;
        cursor = close + 3;

        if !(header.is_empty() || header.eq_ignore_ascii_case("json")) {
            continue;
        }
        if let Some(object) = parse_object(text[block_start..close].trim()) {
            return Some(object);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&trimmed[start..=end])
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(items) => {
            let lines = items
                .iter()
                .filter_map(render_value)
                .filter(|item| !item.trim().is_empty())
                .map(|item| format!("- {item}"))
                .collect::<Vec<_>>();
            Some(lines.join("\n"))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}
