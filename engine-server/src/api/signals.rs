//! Signal intake handlers
//!
//! Both endpoints acknowledge with 202 and queue the payload for the
//! router; venue work never happens on the request path.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::models::InboundSignal;

use super::AppState;

pub async fn receive_signal(
    State(state): State<AppState>,
    Json(mut payload): Json<InboundSignal>,
) -> (StatusCode, Json<serde_json::Value>) {
    // An initial signal carries no parent reference by definition.
    payload.parent_ref = None;
    enqueue(&state, payload)
}

pub async fn receive_signal_update(
    State(state): State<AppState>,
    Json(payload): Json<InboundSignal>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !payload.is_follow_up() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "signal update requires a parent trade reference" })),
        );
    }
    enqueue(&state, payload)
}

fn enqueue(state: &AppState, payload: InboundSignal) -> (StatusCode, Json<serde_json::Value>) {
    match state.signal_tx.send(payload) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))),
        Err(err) => {
            warn!(?err, "signal queue closed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "signal queue unavailable" })),
            )
        }
    }
}
