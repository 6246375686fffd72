//! Futures-venue client library
//!
//! Signed REST clients for Binance USDⓈ-M Futures and KuCoin Futures
//! behind the [`FuturesVenue`] trait, plus the symbol-filter cache,
//! quantization rules, outbound rate limiting and the user-data stream
//! message models the engine consumes.

pub mod binance;
pub mod error;
pub mod filters;
pub mod kucoin;
pub mod rate_limit;
pub mod types;
mod util;

pub use error::{FailureKind, VenueError};
pub use filters::{FilterCache, SymbolFilters};
pub use rate_limit::RateLimiter;
pub use types::{
    AccountTrade, AssetBalance, BookTop, FuturesOrderType, IncomeEvent, NewOrder, OrderSide,
    PlacedOrder, PositionRisk,
};

use async_trait::async_trait;

/// The venue contract the trade engine is written against. Both venue
/// implementations uphold the same invariants: orders are validated and
/// floor-quantized against cached filters before leaving the process, and
/// status-probe results are never merged into placement results.
#[async_trait]
pub trait FuturesVenue: Send + Sync {
    fn venue_name(&self) -> &'static str;

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, VenueError>;
    async fn get_mark_price(&self, symbol: &str) -> Result<f64, VenueError>;
    async fn get_order_book_top(&self, symbol: &str) -> Result<BookTop, VenueError>;

    async fn create_futures_order(&self, order: &NewOrder) -> Result<PlacedOrder, VenueError>;
    async fn cancel_futures_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<PlacedOrder, VenueError>;
    async fn cancel_all_futures_orders(&self, symbol: &str) -> Result<(), VenueError>;
    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<PlacedOrder, VenueError>;
    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>, VenueError>;

    async fn get_position_risk(&self, symbol: Option<&str>)
        -> Result<Vec<PositionRisk>, VenueError>;
    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError>;
    /// Enable the venue's position-scoped TP/SL mode for `symbol`. Venues
    /// without such a mode return `Ok(false)` and protective orders take
    /// the reduce-only path.
    async fn change_position_tpsl_mode(&self, symbol: &str, enabled: bool)
        -> Result<bool, VenueError>;

    async fn get_income(&self, start_ms: i64, end_ms: i64) -> Result<Vec<IncomeEvent>, VenueError>;
    async fn get_account_trades(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<AccountTrade>, VenueError>;
    async fn get_balances(&self) -> Result<Vec<AssetBalance>, VenueError>;

    async fn start_user_data_stream(&self) -> Result<String, VenueError>;
    async fn keepalive_user_data_stream(&self) -> Result<(), VenueError>;
    async fn close_user_data_stream(&self) -> Result<(), VenueError>;
    /// WebSocket URL for the user-data stream opened with `listen_key`.
    fn user_stream_url(&self, listen_key: &str) -> String;
}
