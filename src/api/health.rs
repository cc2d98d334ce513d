// =============================================================================
// GET /health (§6) — overall engine state: breaker state, last webhook
// time, execution queue depth. Generalizes the teacher's `health`/
// `full_state` handlers in `api/rest.rs` into the single operator-facing
// surface this core exposes (no dashboard snapshot).
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app_state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    breaker_open: bool,
    queue_depth: usize,
    last_webhook_at: Option<DateTime<Utc>>,
    uptime_secs: i64,
    server_time: DateTime<Utc>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_version(),
        breaker_open: state.breaker_gate.is_open(),
        queue_depth: state.execution_queue.depth(),
        last_webhook_at: *state.last_webhook_at.read(),
        uptime_secs: (now - state.start_time).num_seconds(),
        server_time: now,
    })
}
