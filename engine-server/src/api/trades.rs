//! Read-only trade and alert inspection

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::AppState;

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_trades(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let trades = state
        .db
        .list_trades(params.limit.clamp(1, 1000))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "trades": trades })))
}

pub async fn get_trade(
    State(state): State<AppState>,
    Path(discord_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let trade = state
        .db
        .get_trade_by_discord_id(&discord_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let alerts = state
        .db
        .alerts_for_trade(&discord_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "trade": trade, "alerts": alerts })))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let alerts = state
        .db
        .list_alerts(params.limit.clamp(1, 1000))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "alerts": alerts })))
}
