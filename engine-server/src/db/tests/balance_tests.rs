//! Balance upsert tests

use super::*;

#[tokio::test]
async fn upsert_inserts_then_updates() {
    let db = create_test_db().await;
    db.upsert_balance("binance", "futures", "USDT", 900.0, 100.0, 1000.0, -5.0)
        .await
        .unwrap();
    db.upsert_balance("binance", "futures", "USDT", 950.0, 50.0, 1000.0, 2.5)
        .await
        .unwrap();
    db.upsert_balance("kucoin", "futures", "USDT", 10.0, 0.0, 10.0, 0.0)
        .await
        .unwrap();

    let balances = db.list_balances().await.unwrap();
    assert_eq!(balances.len(), 2);
    let binance = balances.iter().find(|b| b.platform == "binance").unwrap();
    assert_eq!(binance.free, 950.0);
    assert_eq!(binance.unrealized_pnl, 2.5);
}
