use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use leadflow_core::DedupCache;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub dedup: Arc<DedupCache>,
    pub llm_provider: &'static str,
    pub llm_model: String,
    pub socket_mode: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DedupHealth {
    pub entries: usize,
    pub max_entries: usize,
    pub expiry_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LlmHealth {
    pub provider: &'static str,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub dedup: DedupHealth,
    pub llm: LlmHealth,
    pub slack_transport: &'static str,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let settings = state.dedup.settings();
    let entries = state.dedup.len();
    // A gate pinned at capacity still works but is evicting live keys early.
    let status = if entries >= settings.max_entries { "degraded" } else { "ready" };

    let payload = HealthResponse {
        status,
        service: "leadflow-server",
        dedup: DedupHealth {
            entries,
            max_entries: settings.max_entries,
            expiry_secs: settings.expiry_secs,
        },
        llm: LlmHealth { provider: state.llm_provider, model: state.llm_model.clone() },
        slack_transport: if state.socket_mode { "socket" } else { "webhook" },
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
