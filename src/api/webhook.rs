// =============================================================================
// POST /webhook/monitor — Signal Ingress entry point (§6). Verifies the
// request signature via `SignatureVerifier`, decodes the venue event body,
// and hands it to `SignalIngress::ingest`. Handler shape (state extraction,
// JSON response, structured logging) follows the teacher's `api/rest.rs`
// handlers.
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::signal_ingress::{Ack, RawSwapEvent};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/monitor", post(handle_webhook))
}

/// The venue's webhook body shape. Fields beyond these are preserved in
/// `raw_payload` for the signal row's audit trail but never parsed.
#[derive(Debug, Deserialize)]
struct MonitorEvent {
    tx_signature: String,
    wallet_address: String,
    token_in: String,
    token_out: String,
    amount_in: f64,
    amount_out: f64,
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    result: &'static str,
}

fn ack_str(ack: Ack) -> &'static str {
    match ack {
        Ack::Ack => "ack",
        Ack::Retry => "retry",
        Ack::Duplicate => "duplicate",
    }
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("X-Signal-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.signature_verifier.verify(&body, signature) {
        warn!("webhook: signature verification failed");
        return (StatusCode::FORBIDDEN, Json(WebhookResponse { result: "retry" }));
    }

    let parsed: Result<MonitorEvent, _> = serde_json::from_slice(&body);
    let raw_payload: serde_json::Value =
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    let event = match parsed {
        Ok(e) => e,
        Err(err) => {
            warn!(error = %err, "webhook: malformed event body");
            return (StatusCode::BAD_REQUEST, Json(WebhookResponse { result: "retry" }));
        }
    };

    state.record_webhook_received();

    let raw_event = RawSwapEvent {
        tx_signature: event.tx_signature,
        source_wallet_address: event.wallet_address,
        token_in: event.token_in,
        token_out: event.token_out,
        amount_in: event.amount_in,
        amount_out: event.amount_out,
        raw_payload,
    };

    let ack = state.signal_ingress.ingest(raw_event).await;
    info!(result = ack_str(ack), "webhook: event processed");

    let status = match ack {
        Ack::Ack | Ack::Duplicate => StatusCode::OK,
        Ack::Retry => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(WebhookResponse { result: ack_str(ack) }))
}
