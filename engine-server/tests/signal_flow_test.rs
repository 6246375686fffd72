//! End-to-end signal flow: ingress record → router → coordinator →
//! venue REST (mockito) → persisted trade row.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use perp_pilot_engine_server::config::TradingConfig;
use perp_pilot_engine_server::coordinator::{SymbolMailboxes, TradeCoordinator};
use perp_pilot_engine_server::db::Database;
use perp_pilot_engine_server::fees::FeeCalculator;
use perp_pilot_engine_server::models::{InboundSignal, TradeStatus};
use perp_pilot_engine_server::router::SignalRouter;
use venue_client::binance::BinanceFuturesClient;

fn exchange_info_body() -> &'static str {
    r#"{
        "symbols": [{
            "symbol": "HYPEUSDT",
            "status": "TRADING",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.001"},
                {"filterType": "LOT_SIZE", "stepSize": "0.01", "minQty": "0.01", "maxQty": "100000"},
                {"filterType": "MIN_NOTIONAL", "notional": "5"}
            ]
        }]
    }"#
}

fn order_response(order_id: i64, qty: &str, price: &str) -> String {
    json!({
        "orderId": order_id,
        "clientOrderId": format!("pp-{order_id}"),
        "symbol": "HYPEUSDT",
        "status": "NEW",
        "price": price,
        "avgPrice": "0",
        "origQty": qty,
        "executedQty": "0",
        "stopPrice": "0",
        "side": "BUY",
        "type": "LIMIT",
        "reduceOnly": false,
        "closePosition": false,
        "updateTime": 1736539200500i64
    })
    .to_string()
}

struct Harness {
    db: Arc<Database>,
    router: SignalRouter<TradeCoordinator>,
}

async fn harness(server: &mockito::Server) -> Harness {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let venue = Arc::new(BinanceFuturesClient::new(
        &server.url(),
        "wss://example.invalid",
        "key",
        "secret",
    ));
    let mut trading = TradingConfig::default();
    trading.trade_cooldown_secs = 0;
    trading.position_cooldown_secs = 0;
    let coordinator = Arc::new(TradeCoordinator::new(
        db.clone(),
        venue,
        FeeCalculator::fixed(0.0002),
        trading,
    ));
    let mailboxes = Arc::new(SymbolMailboxes::new(coordinator));
    let router = SignalRouter::new(db.clone(), mailboxes);
    Harness { db, router }
}

fn hype_signal(discord_id: &str) -> InboundSignal {
    InboundSignal {
        timestamp: "2025-01-10T18:00:00.123Z".to_string(),
        content: "HYPE long 32.2-31.5 SL 30.7".to_string(),
        structured: Some("LIMIT|HYPE|Entry:|32.2-31.5|SL:|30.7".to_string()),
        discord_id: Some(discord_id.to_string()),
        parent_ref: None,
        trader: None,
    }
}

async fn wait_for_status(db: &Database, discord_id: &str, status: TradeStatus) {
    for _ in 0..100 {
        if let Some(trade) = db.get_trade_by_discord_id(discord_id).await.unwrap() {
            if trade.status == status {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("trade {discord_id} never reached {status:?}");
}

#[tokio::test]
async fn limit_long_signal_places_order_with_protective_stop() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .with_body(exchange_info_body())
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/premiumIndex")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"{"symbol": "HYPEUSDT", "markPrice": "31.80000000"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/fapi/v1/leverage")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"{"symbol": "HYPEUSDT", "leverage": 1, "maxNotionalValue": "1000000"}"#)
        .create_async()
        .await;
    // Entry: LIMIT BUY, qty floored to 3.17, at the range's upper bound.
    let entry_mock = server
        .mock("POST", "/fapi/v1/order")
        .match_query(mockito::Matcher::AllOf(vec![
            mockito::Matcher::Regex("type=LIMIT".into()),
            mockito::Matcher::Regex("quantity=3.17&".into()),
            mockito::Matcher::Regex("price=32.2&".into()),
        ]))
        .with_body(order_response(42, "3.17", "32.2"))
        .expect(1)
        .create_async()
        .await;
    // Protective SL at 30.7, position-scoped close order.
    let stop_mock = server
        .mock("POST", "/fapi/v1/order")
        .match_query(mockito::Matcher::AllOf(vec![
            mockito::Matcher::Regex("type=STOP_MARKET".into()),
            mockito::Matcher::Regex("stopPrice=30.7&".into()),
            mockito::Matcher::Regex("closePosition=true".into()),
        ]))
        .with_body(
            json!({
                "orderId": 43,
                "clientOrderId": "pp-43",
                "symbol": "HYPEUSDT",
                "status": "NEW",
                "price": "0",
                "avgPrice": "0",
                "origQty": "0",
                "executedQty": "0",
                "stopPrice": "30.7",
                "side": "SELL",
                "type": "STOP_MARKET",
                "reduceOnly": true,
                "closePosition": true,
                "updateTime": 1736539200600i64
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let harness = harness(&server).await;
    harness.router.handle_message(hype_signal("sig-1")).await;
    wait_for_status(&harness.db, "sig-1", TradeStatus::Open).await;

    let trade = harness
        .db
        .get_trade_by_discord_id("sig-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trade.exchange_order_id.as_deref(), Some("42"));
    assert_eq!(trade.entry_price, Some(32.2));
    assert_eq!(trade.position_size, Some(3.17));
    assert_eq!(trade.tp_sl_orders.len(), 1);
    assert_eq!(trade.tp_sl_orders[0].order_id, "43");
    assert!(trade.original_order_response.is_some());
    entry_mock.assert_async().await;
    stop_mock.assert_async().await;
}

#[tokio::test]
async fn duplicate_delivery_places_exactly_one_order() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .with_body(exchange_info_body())
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/premiumIndex")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"{"symbol": "HYPEUSDT", "markPrice": "31.80000000"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/fapi/v1/leverage")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"{"symbol": "HYPEUSDT", "leverage": 1, "maxNotionalValue": "1000000"}"#)
        .create_async()
        .await;
    let entry_mock = server
        .mock("POST", "/fapi/v1/order")
        .match_query(mockito::Matcher::Regex("type=LIMIT".into()))
        .with_body(order_response(42, "3.17", "32.2"))
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/fapi/v1/order")
        .match_query(mockito::Matcher::Regex("type=STOP_MARKET".into()))
        .with_body(order_response(43, "0", "0"))
        .create_async()
        .await;

    let harness = harness(&server).await;
    harness.router.handle_message(hype_signal("sig-1")).await;
    wait_for_status(&harness.db, "sig-1", TradeStatus::Open).await;

    // Same signal re-delivered: binds to the same row, no second order.
    harness.router.handle_message(hype_signal("sig-1-redelivery")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.db.list_trades(10).await.unwrap().len(), 1);
    entry_mock.assert_async().await;
}

#[tokio::test]
async fn market_signal_rejected_far_from_reference_price() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .with_body(exchange_info_body())
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/premiumIndex")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"{"symbol": "HYPEUSDT", "markPrice": "100.00000000"}"#)
        .create_async()
        .await;
    // No order/leverage mocks: a venue call past the reference fetch
    // would 501 and fail the run differently.

    let harness = harness(&server).await;
    harness
        .router
        .handle_message(InboundSignal {
            timestamp: "2025-01-10T18:00:00.123Z".to_string(),
            content: "HYPE long now".to_string(),
            structured: Some("MARKET|HYPE|Entry:|90".to_string()),
            discord_id: Some("sig-mkt".to_string()),
            parent_ref: None,
            trader: None,
        })
        .await;
    wait_for_status(&harness.db, "sig-mkt", TradeStatus::Failed).await;

    let trade = harness
        .db
        .get_trade_by_discord_id("sig-mkt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        trade.binance_response.unwrap()["error"],
        "PRICE_OUT_OF_RANGE"
    );
}
