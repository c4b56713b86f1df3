use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunking::{ChunkOptions, OversizePolicy};
use crate::dedup::DedupSettings;

/// Upper bound on a single backoff between Slack API retries.
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub delivery: DeliveryConfig,
    pub dedup: DedupConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub app_token: Option<SecretString>,
    pub signing_secret: Option<SecretString>,
    pub api_base: String,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl SlackConfig {
    /// Longest one Web API call can take when every attempt times out,
    /// backoff included. `Retry-After` from Slack is not counted.
    pub fn worst_case_call_ms(&self) -> u64 {
        let attempts = u64::from(self.max_retries).saturating_add(1);
        let backoff = (0..self.max_retries).fold(0_u64, |total, retry| {
            let scaled = self.retry_base_delay_ms.saturating_mul(1_u64 << retry.min(10));
            total.saturating_add(scaled.min(MAX_RETRY_DELAY_MS))
        });
        self.request_timeout_ms.saturating_mul(attempts).saturating_add(backoff)
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub max_chunk_chars: usize,
    pub pacing_ms: u64,
    pub send_timeout_ms: u64,
    pub split_oversized_paragraphs: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupConfig {
    pub expiry_secs: u64,
    pub max_entries: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenRouter,
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub server_port: Option<u16>,
    pub max_chunk_chars: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                bot_token: String::new().into(),
                app_token: None,
                signing_secret: None,
                api_base: "https://slack.com/api".to_string(),
                request_timeout_ms: 2_000,
                max_retries: 2,
                retry_base_delay_ms: 250,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenRouter,
                api_key: None,
                base_url: None,
                model: "anthropic/claude-3.5-sonnet".to_string(),
                timeout_secs: 120,
                max_tokens: 4_096,
            },
            delivery: DeliveryConfig {
                max_chunk_chars: 3_000,
                pacing_ms: 500,
                send_timeout_ms: 8_000,
                split_oversized_paragraphs: true,
            },
            dedup: DedupConfig { expiry_secs: 300, max_entries: 100 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openrouter|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

impl DeliveryConfig {
    pub fn chunk_options(&self) -> ChunkOptions {
        let oversize = if self.split_oversized_paragraphs {
            OversizePolicy::SplitOnWhitespace
        } else {
            OversizePolicy::Keep
        };
        ChunkOptions::new(self.max_chunk_chars, oversize)
    }
}

impl DedupConfig {
    pub fn settings(&self) -> DedupSettings {
        DedupSettings { expiry_secs: self.expiry_secs, max_entries: self.max_entries }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(slack_bot_token_value) = slack.bot_token {
                self.slack.bot_token = secret_value(slack_bot_token_value);
            }
            if let Some(slack_app_token_value) = slack.app_token {
                self.slack.app_token = Some(secret_value(slack_app_token_value));
            }
            if let Some(signing_secret_value) = slack.signing_secret {
                self.slack.signing_secret = Some(secret_value(signing_secret_value));
            }
            if let Some(api_base) = slack.api_base {
                self.slack.api_base = api_base;
            }
            if let Some(request_timeout_ms) = slack.request_timeout_ms {
                self.slack.request_timeout_ms = request_timeout_ms;
            }
            if let Some(max_retries) = slack.max_retries {
                self.slack.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = slack.retry_base_delay_ms {
                self.slack.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(max_chunk_chars) = delivery.max_chunk_chars {
                self.delivery.max_chunk_chars = max_chunk_chars;
            }
            if let Some(pacing_ms) = delivery.pacing_ms {
                self.delivery.pacing_ms = pacing_ms;
            }
            if let Some(send_timeout_ms) = delivery.send_timeout_ms {
                self.delivery.send_timeout_ms = send_timeout_ms;
            }
            if let Some(split) = delivery.split_oversized_paragraphs {
                self.delivery.split_oversized_paragraphs = split;
            }
        }

        if let Some(dedup) = patch.dedup {
            if let Some(expiry_secs) = dedup.expiry_secs {
                self.dedup.expiry_secs = expiry_secs;
            }
            if let Some(max_entries) = dedup.max_entries {
                self.dedup.max_entries = max_entries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADFLOW_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("LEADFLOW_SLACK_APP_TOKEN") {
            self.slack.app_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADFLOW_SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADFLOW_SLACK_API_BASE") {
            self.slack.api_base = value;
        }
        if let Some(value) = read_env("LEADFLOW_SLACK_REQUEST_TIMEOUT_MS") {
            self.slack.request_timeout_ms = parse_u64("LEADFLOW_SLACK_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_SLACK_MAX_RETRIES") {
            self.slack.max_retries = parse_u32("LEADFLOW_SLACK_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LEADFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADFLOW_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LEADFLOW_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LEADFLOW_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("LEADFLOW_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("LEADFLOW_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_DELIVERY_MAX_CHUNK_CHARS") {
            self.delivery.max_chunk_chars =
                parse_usize("LEADFLOW_DELIVERY_MAX_CHUNK_CHARS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DELIVERY_PACING_MS") {
            self.delivery.pacing_ms = parse_u64("LEADFLOW_DELIVERY_PACING_MS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DELIVERY_SEND_TIMEOUT_MS") {
            self.delivery.send_timeout_ms = parse_u64("LEADFLOW_DELIVERY_SEND_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DELIVERY_SPLIT_OVERSIZED_PARAGRAPHS") {
            self.delivery.split_oversized_paragraphs =
                parse_bool("LEADFLOW_DELIVERY_SPLIT_OVERSIZED_PARAGRAPHS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_DEDUP_EXPIRY_SECS") {
            self.dedup.expiry_secs = parse_u64("LEADFLOW_DEDUP_EXPIRY_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DEDUP_MAX_ENTRIES") {
            self.dedup.max_entries = parse_usize("LEADFLOW_DEDUP_MAX_ENTRIES", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_PORT") {
            self.server.port = parse_u16("LEADFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("LEADFLOW_LOGGING_LEVEL").or_else(|| read_env("LEADFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADFLOW_LOGGING_FORMAT").or_else(|| read_env("LEADFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = Some(secret_value(slack_app_token));
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = Some(secret_value(signing_secret));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(max_chunk_chars) = overrides.max_chunk_chars {
            self.delivery.max_chunk_chars = max_chunk_chars;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_delivery(&self.delivery)?;
        validate_send_budget(&self.slack, &self.delivery)?;
        validate_dedup(&self.dedup)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadflow.toml"), PathBuf::from("config/leadflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if let Some(app_token) = &slack.app_token {
        let app_token = app_token.expose_secret();
        if !app_token.starts_with("xapp-") {
            let hint = if app_token.starts_with("xoxb-") {
                " (hint: you may have used the bot token instead of the app token)"
            } else {
                ""
            };
            return Err(ConfigError::Validation(format!(
                "slack.app_token must start with `xapp-`{hint}. Get it from https://api.slack.com/apps"
            )));
        }
    }

    if let Some(signing_secret) = &slack.signing_secret {
        if signing_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "slack.signing_secret must not be blank when set".to_string(),
            ));
        }
    }

    let api_base = slack.api_base.trim();
    if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base must start with http:// or https://".to_string(),
        ));
    }

    if slack.request_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "slack.request_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenRouter | LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openrouter/openai providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    Ok(())
}

fn validate_delivery(delivery: &DeliveryConfig) -> Result<(), ConfigError> {
    if delivery.max_chunk_chars < 100 || delivery.max_chunk_chars > 40_000 {
        return Err(ConfigError::Validation(
            "delivery.max_chunk_chars must be in range 100..=40000".to_string(),
        ));
    }

    if delivery.send_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "delivery.send_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if delivery.pacing_ms > 10_000 {
        return Err(ConfigError::Validation(
            "delivery.pacing_ms must be at most 10000".to_string(),
        ));
    }

    Ok(())
}

/// The per-part send timeout wraps the client's retry loop, so it has to
/// outlast every retry or a part is cut off while still being retried.
fn validate_send_budget(
    slack: &SlackConfig,
    delivery: &DeliveryConfig,
) -> Result<(), ConfigError> {
    let worst_case_ms = slack.worst_case_call_ms();
    if delivery.send_timeout_ms < worst_case_ms {
        return Err(ConfigError::Validation(format!(
            "delivery.send_timeout_ms ({}) must be at least {worst_case_ms}ms, the worst case of \
             {} slack attempts at slack.request_timeout_ms={} plus backoff",
            delivery.send_timeout_ms,
            u64::from(slack.max_retries).saturating_add(1),
            slack.request_timeout_ms
        )));
    }

    Ok(())
}

fn validate_dedup(dedup: &DedupConfig) -> Result<(), ConfigError> {
    if dedup.expiry_secs == 0 || dedup.expiry_secs > 86_400 {
        return Err(ConfigError::Validation(
            "dedup.expiry_secs must be in range 1..=86400".to_string(),
        ));
    }

    if dedup.max_entries == 0 {
        return Err(ConfigError::Validation(
            "dedup.max_entries must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    delivery: Option<DeliveryPatch>,
    dedup: Option<DedupPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    app_token: Option<String>,
    signing_secret: Option<String>,
    api_base: Option<String>,
    request_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    max_chunk_chars: Option<usize>,
    pacing_ms: Option<u64>,
    send_timeout_ms: Option<u64>,
    split_oversized_paragraphs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct DedupPatch {
    expiry_secs: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
