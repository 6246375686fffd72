//! Health and operational status handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = state.db.list_balances().await.is_ok();
    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "subcomponents": {
            "database": database,
            "websocket": state.ingestor_status.snapshot(),
            "scheduler": state.scheduler.loop_names(),
        }
    }))
}

pub async fn websocket_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.ingestor_status.snapshot())
}

pub async fn scheduler_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.scheduler.status().await)
}

/// Manual, idempotent loop trigger: running loops are left alone.
pub async fn run_scheduler_loop(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !state.scheduler.loop_names().contains(&name.as_str()) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown loop {name:?}") })),
        );
    }
    let triggered = state.scheduler.trigger(&name).await;
    (
        StatusCode::OK,
        Json(json!({ "loop": name, "triggered": triggered })),
    )
}
