//! Shared test fixtures: the mocked venue and common row builders.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use serde_json::json;

use venue_client::{
    AccountTrade, AssetBalance, BookTop, FuturesVenue, IncomeEvent, NewOrder, OrderSide,
    PlacedOrder, PositionRisk, SymbolFilters, VenueError,
};

use crate::db::Database;
use crate::models::{OrderKind, ParsedSignal, PositionType, Trade, TradeStatus};

mock! {
    pub Venue {}

    #[async_trait]
    impl FuturesVenue for Venue {
        fn venue_name(&self) -> &'static str;
        async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, VenueError>;
        async fn get_mark_price(&self, symbol: &str) -> Result<f64, VenueError>;
        async fn get_order_book_top(&self, symbol: &str) -> Result<BookTop, VenueError>;
        async fn create_futures_order(&self, order: &NewOrder) -> Result<PlacedOrder, VenueError>;
        async fn cancel_futures_order(&self, symbol: &str, order_id: &str) -> Result<PlacedOrder, VenueError>;
        async fn cancel_all_futures_orders(&self, symbol: &str) -> Result<(), VenueError>;
        async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<PlacedOrder, VenueError>;
        #[mockall::concretize]
        async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>, VenueError>;
        #[mockall::concretize]
        async fn get_position_risk(&self, symbol: Option<&str>) -> Result<Vec<PositionRisk>, VenueError>;
        async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError>;
        async fn change_position_tpsl_mode(&self, symbol: &str, enabled: bool) -> Result<bool, VenueError>;
        async fn get_income(&self, start_ms: i64, end_ms: i64) -> Result<Vec<IncomeEvent>, VenueError>;
        async fn get_account_trades(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<AccountTrade>, VenueError>;
        async fn get_balances(&self) -> Result<Vec<AssetBalance>, VenueError>;
        async fn start_user_data_stream(&self) -> Result<String, VenueError>;
        async fn keepalive_user_data_stream(&self) -> Result<(), VenueError>;
        async fn close_user_data_stream(&self) -> Result<(), VenueError>;
        fn user_stream_url(&self, listen_key: &str) -> String;
    }
}

pub fn placed_order(order_id: &str, symbol: &str, reduce_only: bool, order_type: &str) -> PlacedOrder {
    PlacedOrder {
        order_id: order_id.to_string(),
        client_order_id: format!("pp-{order_id}"),
        symbol: symbol.to_string(),
        status: "NEW".to_string(),
        side: OrderSide::Sell,
        order_type: order_type.to_string(),
        orig_qty: 1.0,
        executed_qty: 0.0,
        avg_price: 0.0,
        price: 0.0,
        stop_price: 0.0,
        reduce_only,
        update_time: 0,
        raw: json!({ "orderId": order_id }),
    }
}

pub fn position(symbol: &str, amt: f64, entry: f64) -> PositionRisk {
    PositionRisk {
        symbol: symbol.to_string(),
        position_amt: amt,
        entry_price: entry,
        mark_price: entry,
        unrealized_pnl: 0.0,
        leverage: 1,
        update_time: 0,
    }
}

pub fn market_long_signal(coin: &str) -> ParsedSignal {
    ParsedSignal {
        coin_symbol: coin.to_string(),
        position_type: PositionType::Long,
        entry_prices: vec![140.0],
        stop_loss: None,
        take_profits: vec![],
        order_type: OrderKind::Market,
        quantity_multiplier: None,
    }
}

/// Insert a trade and promote it to OPEN with a placed order.
pub async fn open_market_trade(db: &Arc<Database>, discord_id: &str, coin: &str) -> Trade {
    let trade = db
        .insert_trade(
            discord_id,
            discord_id.as_bytes().iter().map(|b| *b as i64).sum(),
            None,
            &market_long_signal(coin),
        )
        .await
        .unwrap();
    db.record_placement_success(
        trade.id,
        &format!("oid-{}", trade.id),
        Some(140.0),
        Some(3.17),
        &json!({"orderId": format!("oid-{}", trade.id)}),
        TradeStatus::Open,
    )
    .await
    .unwrap();
    db.get_trade(trade.id).await.unwrap().unwrap()
}
