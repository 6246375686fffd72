//! Trade row persistence tests

use serde_json::json;

use super::*;
use crate::models::{ProtectiveKind, ProtectiveOrder, TradeStatus};

#[tokio::test]
async fn insert_and_lookup_by_timestamp_window() {
    let db = create_test_db().await;
    let t = 1736539200123i64;
    let trade = db
        .insert_trade("sig-1", t, Some("trader-a"), &test_signal("HYPE"))
        .await
        .unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);
    assert_eq!(trade.coin_symbol, "HYPE");

    // Exact-millisecond window hits...
    let found = db.find_trade_by_timestamp(t).await.unwrap().unwrap();
    assert_eq!(found.id, trade.id);
    // ...and the next millisecond misses.
    assert!(db.find_trade_by_timestamp(t + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_discord_id_is_rejected() {
    let db = create_test_db().await;
    db.insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();
    let dup = db.insert_trade("sig-1", 2, None, &test_signal("HYPE")).await;
    assert!(dup.is_err());
}

#[tokio::test]
async fn created_at_is_write_once() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();

    assert!(db.set_created_at_if_null(trade.id, 1000).await.unwrap());
    // Second write is a no-op.
    assert!(!db.set_created_at_if_null(trade.id, 2000).await.unwrap());
    let trade = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(trade.created_at, Some(1000));
}

#[tokio::test]
async fn closed_at_is_write_once_and_requires_closed_status() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();
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
    db.set_created_at_if_null(trade.id, 1000).await.unwrap();

    assert!(db.close_trade(trade.id, Some(33.0), Some(3.8), 2000).await.unwrap());
    let closed = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(closed.status, TradeStatus::Closed);
    assert_eq!(closed.closed_at, Some(2000));

    // A second close cannot move closed_at.
    db.close_trade(trade.id, Some(34.0), None, 3000).await.unwrap();
    let closed = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(closed.closed_at, Some(2000));
}

#[tokio::test]
async fn close_before_open_is_refused() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();
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
    db.set_created_at_if_null(trade.id, 5000).await.unwrap();

    // closed_at earlier than created_at: refused and flagged.
    assert!(!db.close_trade(trade.id, None, None, 4000).await.unwrap());
    let trade = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Open);
    assert!(trade.closed_at.is_none());
    assert!(trade.manual_verification_needed);
}

#[tokio::test]
async fn original_order_response_is_preserved_across_probes() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();

    let original = json!({"orderId": 42, "status": "NEW"});
    db.record_placement_success(trade.id, "42", Some(32.2), Some(3.17), &original, TradeStatus::Open)
        .await
        .unwrap();

    // A later probe writes the probe fields...
    let probe = json!({"orderId": 42, "status": "FILLED", "avgPrice": "32.19"});
    db.record_status_probe(trade.id, &probe).await.unwrap();

    let trade = db.get_trade(trade.id).await.unwrap().unwrap();
    // ...but the original placement payload is untouched.
    assert_eq!(trade.original_order_response, Some(original));
    assert_eq!(trade.order_status_response, Some(probe.clone()));
    assert_eq!(trade.binance_response, Some(probe));
}

#[tokio::test]
async fn probe_failure_increments_counter_without_transition() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();
    db.record_placement_success(
        trade.id,
        "42",
        Some(32.2),
        Some(3.17),
        &json!({"orderId": 42}),
        TradeStatus::Open,
    )
    .await
    .unwrap();

    db.record_probe_failure(trade.id, "-2015 Invalid API-key permissions")
        .await
        .unwrap();
    db.record_probe_failure(trade.id, "-2015 Invalid API-key permissions")
        .await
        .unwrap();

    let trade = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(trade.sync_error_count, 2);
    assert_eq!(trade.sync_issues.len(), 2);
    assert_eq!(trade.status, TradeStatus::Open);
    assert!(!trade.manual_verification_needed);
    assert!(trade.order_status_response.is_none());
}

#[tokio::test]
async fn illegal_transition_is_refused_and_flagged() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();
    db.record_placement_success(
        trade.id,
        "42",
        None,
        Some(3.17),
        &json!({"orderId": 42}),
        TradeStatus::Open,
    )
    .await
    .unwrap();
    assert!(db.transition_status(trade.id, TradeStatus::Closed).await.unwrap());

    // CLOSED is terminal; reopening is refused.
    assert!(!db.transition_status(trade.id, TradeStatus::Open).await.unwrap());
    let trade = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);
    assert!(trade.manual_verification_needed);
}

#[tokio::test]
async fn order_id_fallback_scans_response_payload() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();
    // Payload recorded, but exchange_order_id column left empty.
    sqlx::query("UPDATE trades SET binance_response = ? WHERE id = ?")
        .bind(r#"{"orderId":777,"status":"NEW"}"#)
        .bind(trade.id)
        .execute(db.pool())
        .await
        .unwrap();

    let found = db.find_trade_by_order_id("777").await.unwrap().unwrap();
    assert_eq!(found.id, trade.id);
    assert!(db.find_trade_by_order_id("778").await.unwrap().is_none());
}

#[tokio::test]
async fn tp_sl_orders_round_trip() {
    let db = create_test_db().await;
    let trade = db
        .insert_trade("sig-1", 1, None, &test_signal("HYPE"))
        .await
        .unwrap();
    let orders = vec![
        ProtectiveOrder {
            order_id: "100".into(),
            kind: ProtectiveKind::StopLoss,
            trigger_price: 30.7,
            level: None,
        },
        ProtectiveOrder {
            order_id: "101".into(),
            kind: ProtectiveKind::TakeProfit,
            trigger_price: 33.5,
            level: Some(1),
        },
    ];
    db.update_tp_sl_orders(trade.id, &orders).await.unwrap();
    let trade = db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(trade.tp_sl_orders.len(), 2);
    assert_eq!(trade.tp_sl_orders[0].kind, ProtectiveKind::StopLoss);
    assert_eq!(trade.tp_sl_orders[1].level, Some(1));
}

#[tokio::test]
async fn live_trade_queries_filter_by_status_and_symbol() {
    let db = create_test_db().await;
    let a = db.insert_trade("a", 1, None, &test_signal("HYPE")).await.unwrap();
    let b = db.insert_trade("b", 2, None, &test_signal("SOL")).await.unwrap();
    db.insert_trade("c", 3, None, &test_signal("HYPE")).await.unwrap();

    for id in [a.id, b.id] {
        db.record_placement_success(id, "42", None, Some(1.0), &json!({"orderId": 42}), TradeStatus::Open)
            .await
            .unwrap();
    }

    assert_eq!(db.live_trades().await.unwrap().len(), 2);
    assert_eq!(db.live_trades_for_symbol("HYPE").await.unwrap().len(), 1);
    assert_eq!(db.live_trades_for_symbol("SOL").await.unwrap().len(), 1);
    assert_eq!(db.live_trades_for_symbol("BTC").await.unwrap().len(), 0);
}

#[tokio::test]
async fn merge_bookkeeping() {
    let db = create_test_db().await;
    let primary = db.insert_trade("p", 1, None, &test_signal("HYPE")).await.unwrap();
    let secondary = db.insert_trade("s", 2, None, &test_signal("HYPE")).await.unwrap();

    db.record_merge_primary(primary.id, 31.85, 6.34).await.unwrap();
    db.mark_merged(secondary.id, primary.id, "same-side signal within limit")
        .await
        .unwrap();

    let primary = db.get_trade(primary.id).await.unwrap().unwrap();
    assert_eq!(primary.entry_price, Some(31.85));
    assert_eq!(primary.position_size, Some(6.34));

    let secondary = db.get_trade(secondary.id).await.unwrap().unwrap();
    assert_eq!(secondary.merged_into_trade_id, Some(primary.id));
    assert!(secondary.merged_at.is_some());
}
