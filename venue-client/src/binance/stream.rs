//! Binance user-data stream message models
//!
//! Events arrive tagged by `"e"`. Only the user-data events the ingestor
//! applies are modeled; market streams run on a separate connection and
//! are out of scope here.

use serde::Deserialize;

use crate::util::{from_str_to_f64, to_uppercase};

#[derive(Deserialize, Debug)]
#[serde(tag = "e")]
pub enum UserStreamEvent {
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate(OrderTradeUpdate),
    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate(AccountUpdate),
    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired(ListenKeyExpired),
    #[serde(rename = "TRADE_LITE")]
    TradeLite(serde_json::Value),
    #[serde(rename = "MARGIN_CALL")]
    MarginCall(serde_json::Value),
}

#[derive(Deserialize, Debug)]
pub struct OrderTradeUpdate {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "o")]
    pub order: OrderUpdate,
}

#[derive(Deserialize, Debug)]
pub struct OrderUpdate {
    #[serde(rename = "s")]
    #[serde(deserialize_with = "to_uppercase")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "q")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub orig_qty: f64,
    #[serde(rename = "p")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub price: f64,
    #[serde(rename = "ap")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub avg_price: f64,
    #[serde(rename = "sp")]
    #[serde(default)]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub stop_price: f64,
    #[serde(rename = "l")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub last_filled_qty: f64,
    #[serde(rename = "z")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub cum_filled_qty: f64,
    #[serde(rename = "L")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub last_filled_price: f64,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "R")]
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(rename = "rp")]
    #[serde(default)]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub realized_profit: f64,
}

#[derive(Deserialize, Debug)]
pub struct AccountUpdate {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "a")]
    pub account: AccountData,
}

#[derive(Deserialize, Debug)]
pub struct AccountData {
    #[serde(rename = "m")]
    pub reason: String,
    #[serde(rename = "B")]
    #[serde(default)]
    pub balances: Vec<StreamBalance>,
    #[serde(rename = "P")]
    #[serde(default)]
    pub positions: Vec<StreamPosition>,
}

#[derive(Deserialize, Debug)]
pub struct StreamBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "wb")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub wallet_balance: f64,
    #[serde(rename = "cw")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub cross_wallet_balance: f64,
}

#[derive(Deserialize, Debug)]
pub struct StreamPosition {
    #[serde(rename = "s")]
    #[serde(deserialize_with = "to_uppercase")]
    pub symbol: String,
    #[serde(rename = "pa")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub position_amt: f64,
    #[serde(rename = "ep")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub entry_price: f64,
    #[serde(rename = "up")]
    #[serde(deserialize_with = "from_str_to_f64")]
    pub unrealized_pnl: f64,
}

#[derive(Deserialize, Debug)]
pub struct ListenKeyExpired {
    #[serde(rename = "E")]
    pub event_time: i64,
}
