use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadflow_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct ConfigFile {
    path: PathBuf,
    doc: Value,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file = load_config_file(resolve_config_path(None).as_deref());
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    for (key, value) in effective_values(&config) {
        lines.push(render_line(key, &value, field_source(key, file.as_ref())));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let slack = &config.slack;
    let llm = &config.llm;
    let delivery = &config.delivery;

    vec![
        ("slack.bot_token", redact_token(slack.bot_token.expose_secret())),
        ("slack.app_token", optional_token(slack.app_token.as_ref())),
        ("slack.signing_secret", optional_secret(slack.signing_secret.as_ref())),
        ("slack.api_base", slack.api_base.clone()),
        ("slack.request_timeout_ms", slack.request_timeout_ms.to_string()),
        ("slack.max_retries", slack.max_retries.to_string()),
        ("llm.provider", llm.provider.as_str().to_string()),
        ("llm.model", llm.model.clone()),
        ("llm.base_url", llm.effective_base_url().to_string()),
        ("llm.api_key", optional_secret(llm.api_key.as_ref())),
        ("llm.timeout_secs", llm.timeout_secs.to_string()),
        ("llm.max_tokens", llm.max_tokens.to_string()),
        ("delivery.max_chunk_chars", delivery.max_chunk_chars.to_string()),
        ("delivery.pacing_ms", delivery.pacing_ms.to_string()),
        ("delivery.send_timeout_ms", delivery.send_timeout_ms.to_string()),
        ("delivery.split_oversized_paragraphs", delivery.split_oversized_paragraphs.to_string()),
        ("dedup.expiry_secs", config.dedup.expiry_secs.to_string()),
        ("dedup.max_entries", config.dedup.max_entries.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ]
}

fn load_config_file(path: Option<&Path>) -> Option<ConfigFile> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    let doc = raw.parse::<Value>().ok()?;
    Some(ConfigFile { path: path.to_path_buf(), doc })
}

/// `slack.bot_token` is overridden by `LEADFLOW_SLACK_BOT_TOKEN`, and so on.
fn env_key(key_path: &str) -> String {
    format!("LEADFLOW_{}", key_path.replace('.', "_").to_uppercase())
}

fn field_source(key_path: &str, file: Option<&ConfigFile>) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(file) = file {
        if contains_path(&file.doc, key_path) {
            return format!("file ({})", file.path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn optional_token(token: Option<&SecretString>) -> String {
    token.map(|token| redact_token(token.expose_secret())).unwrap_or_else(|| "<unset>".to_string())
}

fn optional_secret(secret: Option<&SecretString>) -> String {
    if secret.is_some() { "<redacted>" } else { "<unset>" }.to_string()
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
