//! Binance USDⓈ-M REST response models

use serde::Deserialize;

use crate::util::{from_str_to_f64, to_uppercase};

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum OrderResponseResult {
    Ok(OrderResponse),
    Err(ErrorResponse),
}

#[derive(Deserialize, Debug)]
pub struct OrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
    #[serde(deserialize_with = "to_uppercase")]
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub price: f64,
    #[serde(rename = "avgPrice")]
    #[serde(default)]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub avg_price: f64,
    #[serde(rename = "origQty")]
    #[serde(default)]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub orig_qty: f64,
    #[serde(rename = "executedQty")]
    #[serde(default)]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub executed_qty: f64,
    #[serde(rename = "stopPrice")]
    #[serde(default)]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub stop_price: f64,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(rename = "reduceOnly")]
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(rename = "closePosition")]
    #[serde(default)]
    pub close_position: bool,
    #[serde(rename = "updateTime")]
    #[serde(default)]
    pub update_time: i64,
}

#[derive(Deserialize, Debug)]
pub struct ErrorResponse {
    pub code: i64,
    pub msg: String,
}

#[derive(Deserialize, Debug)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize, Debug)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Only the filters the engine enforces are modeled; the rest of the
/// exchange-info payload is ignored.
#[derive(Deserialize, Debug)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: String,
        #[serde(rename = "minQty")]
        min_qty: String,
        #[serde(rename = "maxQty")]
        max_qty: String,
    },
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter {
        #[serde(rename = "tickSize")]
        tick_size: String,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
pub struct PremiumIndex {
    pub symbol: String,
    #[serde(rename = "markPrice")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub mark_price: f64,
}

#[derive(Deserialize, Debug)]
pub struct BookTicker {
    pub symbol: String,
    #[serde(rename = "bidPrice")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub bid_price: f64,
    #[serde(rename = "askPrice")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub ask_price: f64,
}

#[derive(Deserialize, Debug)]
pub struct PositionRiskV2 {
    #[serde(deserialize_with = "to_uppercase")]
    pub symbol: String,
    #[serde(rename = "positionAmt")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub position_amt: f64,
    #[serde(rename = "entryPrice")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub entry_price: f64,
    #[serde(rename = "markPrice")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub mark_price: f64,
    #[serde(rename = "unRealizedProfit")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub unrealized_pnl: f64,
    #[serde(deserialize_with = "from_str_to_f64")]
    pub leverage: f64,
    #[serde(rename = "updateTime")]
    #[serde(default)]
    pub update_time: i64,
}

#[derive(Deserialize, Debug)]
pub struct Income {
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "incomeType")]
    pub income_type: String,
    #[serde(deserialize_with = "from_str_to_f64")]
    pub income: f64,
    pub asset: String,
    pub time: i64,
}

#[derive(Deserialize, Debug)]
pub struct UserTrade {
    #[serde(deserialize_with = "to_uppercase")]
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    pub side: String,
    #[serde(deserialize_with = "from_str_to_f64")]
    pub price: f64,
    #[serde(deserialize_with = "from_str_to_f64")]
    pub qty: f64,
    #[serde(rename = "realizedPnl")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub realized_pnl: f64,
    #[serde(deserialize_with = "from_str_to_f64")]
    pub commission: f64,
    #[serde(rename = "commissionAsset")]
    pub commission_asset: String,
    pub time: i64,
}

#[derive(Deserialize, Debug)]
pub struct FuturesBalance {
    pub asset: String,
    #[serde(deserialize_with = "from_str_to_f64")]
    pub balance: f64,
    #[serde(rename = "availableBalance")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub available_balance: f64,
    #[serde(rename = "crossUnPnl")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub cross_un_pnl: f64,
}

#[derive(Deserialize, Debug)]
pub struct ListenKey {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}
