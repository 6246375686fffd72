//! Shared test utilities for database tests

use crate::db::Database;
use crate::models::{OrderKind, ParsedSignal, PositionType};

pub(crate) async fn create_test_db() -> Database {
    Database::new("sqlite::memory:").await.unwrap()
}

pub(crate) fn test_signal(coin: &str) -> ParsedSignal {
    ParsedSignal {
        coin_symbol: coin.to_string(),
        position_type: PositionType::Long,
        entry_prices: vec![32.2, 31.5],
        stop_loss: Some(30.7),
        take_profits: vec![33.5],
        order_type: OrderKind::Limit,
        quantity_multiplier: None,
    }
}

mod balance_tests;
mod trade_tests;
