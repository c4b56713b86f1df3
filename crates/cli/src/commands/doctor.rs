use leadflow_core::config::{AppConfig, LlmProvider, LoadOptions};
use serde::Serialize;

use crate::commands::{escape_json, CommandResult, EXIT_NOT_READY};

/// Slack truncates message text past this many characters.
const SLACK_TEXT_LIMIT: usize = 40_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report(AppConfig::load(LoadOptions::default()).map_err(|e| e.to_string()));
    let exit_code = if report.overall_status == CheckStatus::Fail { EXIT_NOT_READY } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(config: Result<AppConfig, String>) -> DoctorReport {
    let mut checks = Vec::new();

    match config {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_slack_transport(&config));
            checks.push(check_llm_backend(&config));
            checks.push(check_delivery_policy(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error,
            });
            for name in ["slack_transport", "llm_backend", "delivery_policy"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let overall_status = if checks.iter().any(|check| check.status == CheckStatus::Fail) {
        CheckStatus::Fail
    } else if checks.iter().any(|check| check.status == CheckStatus::Warn) {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let summary = match overall_status {
        CheckStatus::Pass => "doctor: all readiness checks passed",
        CheckStatus::Warn => "doctor: ready, with warnings",
        _ => "doctor: one or more readiness checks failed",
    }
    .to_string();

    DoctorReport { overall_status, summary, checks }
}

fn check_slack_transport(config: &AppConfig) -> DoctorCheck {
    let slack = &config.slack;
    match (&slack.app_token, &slack.signing_secret) {
        (Some(_), _) => DoctorCheck {
            name: "slack_transport",
            status: CheckStatus::Pass,
            details: "socket mode: app token present, events arrive over websocket".to_string(),
        },
        (None, Some(_)) => DoctorCheck {
            name: "slack_transport",
            status: CheckStatus::Pass,
            details: format!(
                "webhook mode: signed requests accepted on {}:{}/slack/events",
                config.server.bind_address, config.server.port
            ),
        },
        (None, None) => DoctorCheck {
            name: "slack_transport",
            status: CheckStatus::Warn,
            details: "webhook mode without slack.signing_secret: request signatures are not verified"
                .to_string(),
        },
    }
}

fn check_llm_backend(config: &AppConfig) -> DoctorCheck {
    let llm = &config.llm;
    let base_url = llm.effective_base_url();
    if llm.provider == LlmProvider::Ollama && !is_local(base_url) {
        return DoctorCheck {
            name: "llm_backend",
            status: CheckStatus::Warn,
            details: format!("ollama provider points at non-local `{base_url}`"),
        };
    }

    DoctorCheck {
        name: "llm_backend",
        status: CheckStatus::Pass,
        details: format!(
            "{} model `{}` via {base_url} (timeout {}s)",
            llm.provider.as_str(),
            llm.model,
            llm.timeout_secs
        ),
    }
}

fn check_delivery_policy(config: &AppConfig) -> DoctorCheck {
    let delivery = &config.delivery;
    let header_room = "[Part 99/99]\n".len();
    if delivery.max_chunk_chars + header_room > SLACK_TEXT_LIMIT {
        return DoctorCheck {
            name: "delivery_policy",
            status: CheckStatus::Warn,
            details: format!(
                "max_chunk_chars {} leaves no room for part headers under Slack's {SLACK_TEXT_LIMIT} limit",
                delivery.max_chunk_chars
            ),
        };
    }

    DoctorCheck {
        name: "delivery_policy",
        status: CheckStatus::Pass,
        details: format!(
            "parts of at most {} chars, {}ms apart, {}ms send timeout",
            delivery.max_chunk_chars, delivery.pacing_ms, delivery.send_timeout_ms
        ),
    }
}

fn is_local(base_url: &str) -> bool {
    ["http://localhost", "http://127.0.0.1", "http://[::1]"]
        .iter()
        .any(|prefix| base_url.starts_with(prefix))
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
