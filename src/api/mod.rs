// =============================================================================
// Operator-facing HTTP layer (§6) — a thin surface around the engine, not
// the core itself. Three endpoints: the webhook ingress, the health probe,
// and the bearer-gated config reload. Router assembly follows the
// teacher's `api/rest.rs::router` shape (CORS layer, shared `Arc<AppState>`).
// =============================================================================

pub mod admin;
pub mod auth;
pub mod health;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .merge(webhook::router())
        .merge(health::router())
        .merge(admin::router())
        .layer(cors)
        .with_state(state)
}
