//! Ingress REST API
//!
//! Signal intake plus operational surfaces: health, stream and scheduler
//! status, manual loop triggers, and read-only trade/alert inspection.
//! Well-formed signal payloads are always acknowledged 2xx immediately;
//! per-trade outcomes land on the rows and are inspectable via the query
//! endpoints.

mod signals;
mod status;
mod trades;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

use crate::db::Database;
use crate::ingestor::IngestorStatus;
use crate::models::InboundSignal;
use crate::sync::SyncScheduler;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub signal_tx: mpsc::UnboundedSender<InboundSignal>,
    pub scheduler: Arc<SyncScheduler>,
    pub ingestor_status: Arc<IngestorStatus>,
    pub started_at: Instant,
}

pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(tracing::Level::DEBUG))
        .on_response(
            DefaultOnResponse::new()
                .level(tracing::Level::DEBUG)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::new()
        .route("/api/v1/discord/signal", post(signals::receive_signal))
        .route(
            "/api/v1/discord/signal/update",
            post(signals::receive_signal_update),
        )
        .route("/health", get(status::health))
        .route("/websocket/status", get(status::websocket_status))
        .route("/scheduler/status", get(status::scheduler_status))
        .route("/scheduler/run/:name", post(status::run_scheduler_loop))
        .route("/api/v1/trades", get(trades::list_trades))
        .route("/api/v1/trades/:discord_id", get(trades::get_trade))
        .route("/api/v1/alerts", get(trades::list_alerts))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
