//! PnL backfill against venue trade/income history: the venue's realized
//! PnL wins, lifecycle timestamps stay untouched, and income events are
//! archived with dedupe.

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
        entry_prices: vec![31.8],
        stop_loss: None,
        take_profits: vec![],
        order_type: OrderKind::Market,
        quantity_multiplier: None,
    }
}

#[tokio::test]
async fn closed_trade_gets_venue_realized_pnl() {
    let mut server = mockito::Server::new_async().await;

    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let venue = Arc::new(BinanceFuturesClient::new(
        &server.url(),
        "wss://example.invalid",
        "key",
        "secret",
    ));
    let scheduler = SyncScheduler::new(db.clone(), venue, &SchedulerConfig::default());

    // A trade that closed without PnL (e.g. the close happened while the
    // stream was down).
    let trade = db.insert_trade("sig-1", 1_736_539_200_000, None, &signal()).await.unwrap();
    db.record_placement_success(
        trade.id,
        "42",
        Some(31.8),
        Some(3.17),
        &json!({"orderId": 42}),
        TradeStatus::Open,
    )
    .await
    .unwrap();
    db.set_created_at_if_null(trade.id, 1_736_539_201_000).await.unwrap();
    assert!(db.close_trade(trade.id, None, None, 1_736_539_800_000).await.unwrap());

    server
        .mock("GET", "/fapi/v1/userTrades")
        .match_query(mockito::Matcher::Any)
        .with_body(
            json!([
                {
                    "symbol": "HYPEUSDT",
                    "orderId": 42,
                    "side": "BUY",
                    "price": "31.8",
                    "qty": "3.17",
                    "realizedPnl": "0",
                    "commission": "0.02",
                    "commissionAsset": "USDT",
                    "time": 1_736_539_201_000i64
                },
                {
                    "symbol": "HYPEUSDT",
                    "orderId": 77,
                    "side": "SELL",
                    "price": "33.0",
                    "qty": "3.17",
                    "realizedPnl": "3.804",
                    "commission": "0.02",
                    "commissionAsset": "USDT",
                    "time": 1_736_539_800_000i64
                }
            ])
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/income")
        .match_query(mockito::Matcher::Any)
        .with_body(
            json!([
                {
                    "symbol": "HYPEUSDT",
                    "incomeType": "REALIZED_PNL",
                    "income": "3.804",
                    "asset": "USDT",
                    "time": 1_736_539_800_000i64
                },
                {
                    "symbol": "HYPEUSDT",
                    "incomeType": "COMMISSION",
                    "income": "-0.04",
                    "asset": "USDT",
                    "time": 1_736_539_800_000i64
                }
            ])
            .to_string(),
        )
        .create_async()
        .await;

    assert!(scheduler.trigger("pnl").await);

    let backfilled = db.get_trade(trade.id).await.unwrap().unwrap();
    // Venue realized PnL, not a locally computed figure.
    assert_eq!(backfilled.pnl_usd, Some(3.804));
    assert_eq!(backfilled.exit_price, Some(33.0));
    // Lifecycle timestamps untouched.
    assert_eq!(backfilled.created_at, Some(1_736_539_201_000));
    assert_eq!(backfilled.closed_at, Some(1_736_539_800_000));

    // Income archived with dedupe: a second run inserts nothing new.
    assert_eq!(db.list_transactions(100).await.unwrap().len(), 2);
    assert!(scheduler.trigger("pnl").await);
    assert_eq!(db.list_transactions(100).await.unwrap().len(), 2);
}
