//! Router-level API tests

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::api::{create_router, AppState};
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::ingestor::IngestorStatus;
use crate::models::InboundSignal;
use crate::sync::SyncScheduler;
use crate::test_support::MockVenue;

async fn setup(venue: MockVenue) -> (AppState, mpsc::UnboundedReceiver<InboundSignal>) {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let scheduler = SyncScheduler::new(db.clone(), Arc::new(venue), &SchedulerConfig::default());
    let state = AppState {
        db,
        signal_tx,
        scheduler,
        ingestor_status: Arc::new(IngestorStatus::default()),
        started_at: Instant::now(),
    };
    (state, signal_rx)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn signal_is_accepted_and_queued() {
    let (state, mut signal_rx) = setup(MockVenue::new()).await;
    let app = create_router(state);

    let response = app
        .oneshot(post_json(
            "/api/v1/discord/signal",
            serde_json::json!({
                "timestamp": "2025-01-10T18:00:00.123Z",
                "content": "HYPE long 32.2-31.5 SL 30.7",
                "structured": "LIMIT|HYPE|Entry:|32.2-31.5|SL:|30.7",
                "discord_id": "sig-1"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let queued = signal_rx.recv().await.unwrap();
    assert_eq!(queued.discord_id.as_deref(), Some("sig-1"));
    assert!(!queued.is_follow_up());
}

#[tokio::test]
async fn signal_update_requires_parent_reference() {
    let (state, mut signal_rx) = setup(MockVenue::new()).await;
    let app = create_router(state);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/discord/signal/update",
            serde_json::json!({
                "timestamp": "2025-01-10T19:00:00.000Z",
                "content": "tp1 hit"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/api/v1/discord/signal/update",
            serde_json::json!({
                "timestamp": "2025-01-10T19:00:00.000Z",
                "content": "tp1 hit",
                "trade": "sig-1",
                "discord_id": "alert-1"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let queued = signal_rx.recv().await.unwrap();
    assert_eq!(queued.parent_ref.as_deref(), Some("sig-1"));
}

#[tokio::test]
async fn health_reports_subcomponents() {
    let (state, _rx) = setup(MockVenue::new()).await;
    let app = create_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["subcomponents"]["database"], true);
}

#[tokio::test]
async fn manual_scheduler_trigger_runs_loop() {
    let mut venue = MockVenue::new();
    venue.expect_venue_name().return_const("binance");
    venue.expect_get_balances().times(1).returning(|| Ok(vec![]));
    let (state, _rx) = setup(venue).await;
    let app = create_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scheduler/run/balances")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["triggered"], true);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scheduler/run/nonsense")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trade_inspection_endpoints() {
    let (state, _rx) = setup(MockVenue::new()).await;
    let db = state.db.clone();
    let parsed = crate::models::ParsedSignal::parse(
        "LIMIT|HYPE|Entry:|32.2-31.5|SL:|30.7",
        "HYPE long",
    )
    .unwrap();
    db.insert_trade("sig-1", 1736539200123, None, &parsed)
        .await
        .unwrap();
    let app = create_router(state);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/trades").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["trades"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/trades/sig-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/trades/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
