use std::fs;
use std::path::Path;

use leadflow_core::chunking::DEFAULT_MAX_CHUNK_CHARS;
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::{chunk_with, ChunkOptions, MessageChunk, OversizePolicy};
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_INPUT};

/// Same bounds `delivery.max_chunk_chars` is validated against.
const MIN_CHARS: usize = 100;
const MAX_CHARS: usize = 40_000;

#[derive(Debug, Serialize)]
struct PartPreview {
    ordinal: usize,
    total: usize,
    chars: usize,
    rendered: String,
}

pub fn run(path: &Path, max_chars: Option<usize>, keep_oversized: bool) -> CommandResult {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            return CommandResult::failure(
                "chunk",
                "input_unreadable",
                format!("failed to read `{}`: {error}", path.display()),
                EXIT_INPUT,
            );
        }
    };

    let max_length = max_chars.unwrap_or_else(configured_max_chars);
    if !(MIN_CHARS..=MAX_CHARS).contains(&max_length) {
        return CommandResult::failure(
            "chunk",
            "config_validation",
            format!("--max-chars must be in range {MIN_CHARS}..={MAX_CHARS}, got {max_length}"),
            EXIT_CONFIG,
        );
    }

    let oversize =
        if keep_oversized { OversizePolicy::Keep } else { OversizePolicy::SplitOnWhitespace };
    let parts = preview(&text, &ChunkOptions::new(max_length, oversize));
    let over_limit = parts.iter().filter(|part| part.chars > max_length).count();

    let mut message = format!("{} part(s) at max {max_length} chars", parts.len());
    if over_limit > 0 {
        message.push_str(&format!(", {over_limit} over the limit"));
    }

    CommandResult::success("chunk", message, serde_json::to_value(&parts).ok())
}

fn preview(text: &str, options: &ChunkOptions) -> Vec<PartPreview> {
    MessageChunk::sequence(chunk_with(text, options))
        .into_iter()
        .map(|part| PartPreview {
            ordinal: part.ordinal,
            total: part.total,
            chars: part.body.chars().count(),
            rendered: part.render(),
        })
        .collect()
}

/// Falls back to the built-in default when the config does not load, since
/// previewing needs no Slack or LLM credentials.
fn configured_max_chars() -> usize {
    AppConfig::load(LoadOptions::default())
        .map(|config| config.delivery.max_chunk_chars)
        .unwrap_or(DEFAULT_MAX_CHUNK_CHARS)
}
