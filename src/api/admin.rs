// =============================================================================
// Admin surface (§6) — bearer-authenticated operator endpoints. Config
// hot-reload reuses the teacher's `AuthBearer` extractor verbatim (the
// teacher's own admin control endpoints in `api/rest.rs` are gated the same
// way).
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::domain::OrderId;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/config/reload", post(reload_config))
        .route("/admin/breaker/reset", post(reset_breaker))
        .route("/admin/orders/:order_id/cancel", post(cancel_order))
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    result: &'static str,
    state_version: u64,
}

async fn reload_config(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match RuntimeConfig::load(CONFIG_PATH) {
        Ok(new_config) => {
            *state.runtime_config.write() = new_config;
            let version = state.increment_version();
            info!(state_version = version, "admin: runtime config reloaded");
            (
                StatusCode::OK,
                Json(ReloadResponse { result: "reloaded", state_version: version }),
            )
        }
        Err(e) => {
            warn!(error = %e, "admin: config reload failed");
            state.push_error(format!("config reload failed: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReloadResponse { result: "error", state_version: state.current_version() }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
struct BreakerResetResponse {
    result: &'static str,
    state_version: u64,
}

#[derive(Debug, Serialize)]
struct CancelOrderResponse {
    result: &'static str,
    cancelled: bool,
}

/// Cancels a still-pending (pre-submit) order (§4.3, §5). Only entries that
/// haven't yet been popped off the execution queue for dispatch can be
/// cancelled this way; `cancelled: false` means the order had already moved
/// past `pending` (or never existed) and must be left to reach its own
/// terminal status.
async fn cancel_order(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> impl IntoResponse {
    let Ok(uuid) = order_id.parse::<uuid::Uuid>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(CancelOrderResponse { result: "invalid_order_id", cancelled: false }),
        );
    };
    let cancelled = state.execution_queue.cancel(OrderId(uuid)).await;
    if cancelled {
        info!(order = %uuid, "admin: order cancelled");
        (StatusCode::OK, Json(CancelOrderResponse { result: "cancelled", cancelled: true }))
    } else {
        (
            StatusCode::CONFLICT,
            Json(CancelOrderResponse { result: "not_pending", cancelled: false }),
        )
    }
}

/// Manual circuit breaker reset (§4.7 reset path (a), operator API). Forces
/// the gate closed and appends a `reset` event regardless of current
/// drawdown/loss figures; the next periodic evaluation may trip it again if
/// the underlying condition hasn't actually cleared.
async fn reset_breaker(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.circuit_breaker.manual_reset().await {
        Ok(()) => {
            let version = state.increment_version();
            info!(state_version = version, "admin: circuit breaker manually reset");
            (
                StatusCode::OK,
                Json(BreakerResetResponse { result: "reset", state_version: version }),
            )
        }
        Err(e) => {
            warn!(error = %e, "admin: circuit breaker manual reset failed");
            state.push_error(format!("breaker reset failed: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(BreakerResetResponse { result: "error", state_version: state.current_version() }),
            )
        }
    }
}
