//! Venue-neutral request/response types
//!
//! The engine talks to both venues through these; the venue modules map
//! their wire shapes into them. Raw payloads ride along untouched on
//! [`PlacedOrder::raw`] so the caller can persist the venue response
//! verbatim for audit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuturesOrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl FuturesOrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuturesOrderType::Market => "MARKET",
            FuturesOrderType::Limit => "LIMIT",
            FuturesOrderType::StopMarket => "STOP_MARKET",
            FuturesOrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// An order request, already sized and quantized by the caller. The venue
/// client re-validates against the cached filters before sending.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: FuturesOrderType,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    /// Position-scoped protective order: closes whatever position exists
    /// when triggered. Mutually exclusive with `quantity`.
    pub close_position: bool,
    pub client_order_id: String,
}

impl NewOrder {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal, client_order_id: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: FuturesOrderType::Market,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            reduce_only: false,
            close_position: false,
            client_order_id,
        }
    }

    pub fn limit(
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        client_order_id: String,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: FuturesOrderType::Limit,
            quantity: Some(quantity),
            price: Some(price),
            stop_price: None,
            reduce_only: false,
            close_position: false,
            client_order_id,
        }
    }
}

/// A venue-acknowledged order. Presence of `order_id` is the success
/// criterion for placement regardless of later probe outcomes.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    pub side: OrderSide,
    pub order_type: String,
    pub orig_qty: f64,
    pub executed_qty: f64,
    pub avg_price: f64,
    pub price: f64,
    pub stop_price: f64,
    pub reduce_only: bool,
    pub update_time: i64,
    /// Verbatim venue payload, preserved for audit.
    pub raw: serde_json::Value,
}

impl PlacedOrder {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status.as_str(), "NEW" | "PARTIALLY_FILLED")
    }
}

#[derive(Debug, Clone)]
pub struct BookTop {
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone)]
pub struct PositionRisk {
    pub symbol: String,
    /// Signed position size: positive long, negative short.
    pub position_amt: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: u32,
    pub update_time: i64,
}

impl PositionRisk {
    pub fn is_open(&self) -> bool {
        self.position_amt.abs() > f64::EPSILON
    }

    pub fn side(&self) -> OrderSide {
        if self.position_amt >= 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

/// One venue income event (realized PnL, commission, funding, ...).
#[derive(Debug, Clone)]
pub struct IncomeEvent {
    pub time: i64,
    pub income_type: String,
    pub income: f64,
    pub asset: String,
    pub symbol: String,
}

/// One account fill, as returned by the venue trade-history endpoint.
#[derive(Debug, Clone)]
pub struct AccountTrade {
    pub symbol: String,
    pub order_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub qty: f64,
    pub realized_pnl: f64,
    pub commission: f64,
    pub commission_asset: String,
    pub time: i64,
}

#[derive(Debug, Clone)]
pub struct AssetBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
    pub total: f64,
    pub unrealized_pnl: f64,
}
