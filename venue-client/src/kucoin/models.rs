//! KuCoin Futures REST response models
//!
//! Every endpoint wraps its payload in `{"code": "200000", "data": ...}`;
//! non-success codes carry `msg` instead of `data`.

use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Envelope {
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
pub struct Contract {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "lotSize")]
    pub lot_size: f64,
    #[serde(rename = "tickSize")]
    pub tick_size: f64,
    #[serde(rename = "maxOrderQty")]
    pub max_order_qty: f64,
    #[serde(rename = "multiplier")]
    pub multiplier: f64,
}

#[derive(Deserialize, Debug)]
pub struct MarkPrice {
    pub symbol: String,
    pub value: f64,
}

#[derive(Deserialize, Debug)]
pub struct Ticker {
    pub symbol: String,
    #[serde(rename = "bestBidPrice")]
    pub best_bid_price: String,
    #[serde(rename = "bestAskPrice")]
    pub best_ask_price: String,
}

#[derive(Deserialize, Debug)]
pub struct OrderAck {
    #[serde(rename = "orderId")]
    pub order_id: String,
}

#[derive(Deserialize, Debug)]
pub struct OrderDetail {
    pub id: String,
    #[serde(rename = "clientOid")]
    #[serde(default)]
    pub client_oid: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub price: Option<String>,
    pub size: f64,
    #[serde(rename = "dealSize")]
    pub deal_size: f64,
    #[serde(rename = "dealValue")]
    #[serde(default)]
    pub deal_value: Option<String>,
    #[serde(rename = "stopPrice")]
    #[serde(default)]
    pub stop_price: Option<String>,
    #[serde(rename = "reduceOnly")]
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "cancelExist")]
    pub cancel_exist: bool,
    #[serde(rename = "updatedAt")]
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Deserialize, Debug)]
pub struct OrderPage {
    #[serde(default)]
    pub items: Vec<OrderDetail>,
}

#[derive(Deserialize, Debug)]
pub struct Position {
    pub symbol: String,
    #[serde(rename = "currentQty")]
    pub current_qty: f64,
    #[serde(rename = "avgEntryPrice")]
    #[serde(default)]
    pub avg_entry_price: f64,
    #[serde(rename = "markPrice")]
    #[serde(default)]
    pub mark_price: f64,
    #[serde(rename = "unrealisedPnl")]
    #[serde(default)]
    pub unrealised_pnl: f64,
    #[serde(rename = "realLeverage")]
    #[serde(default)]
    pub real_leverage: f64,
    #[serde(rename = "currentTimestamp")]
    #[serde(default)]
    pub current_timestamp: i64,
}

#[derive(Deserialize, Debug)]
pub struct TransactionPage {
    #[serde(rename = "dataList")]
    #[serde(default)]
    pub data_list: Vec<Transaction>,
}

#[derive(Deserialize, Debug)]
pub struct Transaction {
    pub time: i64,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub remark: String,
}

#[derive(Deserialize, Debug)]
pub struct FillPage {
    #[serde(default)]
    pub items: Vec<Fill>,
}

#[derive(Deserialize, Debug)]
pub struct Fill {
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub side: String,
    pub price: String,
    pub size: f64,
    #[serde(rename = "fee")]
    pub fee: String,
    #[serde(rename = "feeCurrency")]
    pub fee_currency: String,
    #[serde(rename = "tradeTime")]
    pub trade_time: i64,
}

#[derive(Deserialize, Debug)]
pub struct AccountOverview {
    pub currency: String,
    #[serde(rename = "availableBalance")]
    pub available_balance: f64,
    #[serde(rename = "orderMargin")]
    #[serde(default)]
    pub order_margin: f64,
    #[serde(rename = "positionMargin")]
    #[serde(default)]
    pub position_margin: f64,
    #[serde(rename = "accountEquity")]
    pub account_equity: f64,
    #[serde(rename = "unrealisedPNL")]
    #[serde(default)]
    pub unrealised_pnl: f64,
}

#[derive(Deserialize, Debug)]
pub struct BulletToken {
    pub token: String,
    #[serde(rename = "instanceServers")]
    pub instance_servers: Vec<InstanceServer>,
}

#[derive(Deserialize, Debug)]
pub struct InstanceServer {
    pub endpoint: String,
    #[serde(rename = "pingInterval")]
    #[serde(default)]
    pub ping_interval: i64,
}
