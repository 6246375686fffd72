//! A status probe failing with a permission error must never undo a
//! successful placement; once permissions return, the next sync pass
//! reconciles normally.

use std::sync::Arc;

use serde_json::json;

use perp_pilot_engine_server::config::SchedulerConfig;
use perp_pilot_engine_server::db::Database;
use perp_pilot_engine_server::models::{OrderKind, ParsedSignal, PositionType, TradeStatus};
use perp_pilot_engine_server::sync::SyncScheduler;
use venue_client::binance::BinanceFuturesClient;

fn signal() -> ParsedSignal {
    ParsedSignal {
        coin_symbol: "HYPE".to_string(),
        position_type: PositionType::Long,
        entry_prices: vec![32.2],
        stop_loss: None,
        take_profits: vec![],
        order_type: OrderKind::Limit,
        quantity_multiplier: None,
    }
}

#[tokio::test]
async fn forbidden_probe_never_fails_a_placed_trade() {
    let mut server = mockito::Server::new_async().await;

    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let venue = Arc::new(BinanceFuturesClient::new(
        &server.url(),
        "wss://example.invalid",
        "key",
        "secret",
    ));
    let scheduler = SyncScheduler::new(db.clone(), venue, &SchedulerConfig::default());

    // A trade whose placement already succeeded with a venue order id.
    let trade = db.insert_trade("sig-1", 1, None, &signal()).await.unwrap();
    let original = json!({ "orderId": 1001, "status": "NEW" });
    db.record_placement_success(trade.id, "1001", Some(32.2), Some(3.17), &original, TradeStatus::Open)
        .await
        .unwrap();

    // Permissions revoked: probes come back -2015.
    let forbidden = server
        .mock("GET", "/fapi/v1/order")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"{"code": -2015, "msg": "Invalid API-key, IP, or permissions for action."}"#)
        .expect(1)
        .create_async()
        .await;

    assert!(scheduler.trigger("status").await);
    forbidden.assert_async().await;

    let probed = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(probed.status, TradeStatus::Open);
    assert_eq!(probed.original_order_response, Some(original.clone()));
    assert!(probed.order_status_response.is_none());
    assert_eq!(probed.sync_error_count, 1);
    assert!(!probed.manual_verification_needed);

    // Permissions restored: the next pass records the probe and applies
    // the fill.
    forbidden.remove_async().await;
    server
        .mock("GET", "/fapi/v1/order")
        .match_query(mockito::Matcher::Any)
        .with_body(
            json!({
                "orderId": 1001,
                "clientOrderId": "pp-a1",
                "symbol": "HYPEUSDT",
                "status": "FILLED",
                "price": "32.2",
                "avgPrice": "32.19",
                "origQty": "3.17",
                "executedQty": "3.17",
                "stopPrice": "0",
                "side": "BUY",
                "type": "LIMIT",
                "reduceOnly": false,
                "closePosition": false,
                "updateTime": 1736539201000i64
            })
            .to_string(),
        )
        .create_async()
        .await;

    assert!(scheduler.trigger("status").await);

    let reconciled = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(reconciled.status, TradeStatus::Open);
    assert_eq!(reconciled.original_order_response, Some(original));
    assert!(reconciled.order_status_response.is_some());
    assert_eq!(reconciled.binance_entry_price, Some(32.19));
    assert_eq!(reconciled.created_at, Some(1736539201000));
    assert_eq!(reconciled.sync_error_count, 1);
}
