//! Domain models
//!
//! Row structs for the persistent store plus the parsed-signal and
//! alert-action types the router and coordinator operate on.

mod alert;
mod signal;
mod trade;

pub use alert::*;
pub use signal::*;
pub use trade::*;

use serde::{Deserialize, Serialize};

/// One venue balance row, keyed by platform × account type × asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRow {
    pub platform: String,
    pub account_type: String,
    pub asset: String,
    pub free: f64,
    pub locked: f64,
    pub total: f64,
    pub unrealized_pnl: f64,
    pub last_updated: String,
}

/// One venue income event. Deduped on (time, type, amount, asset, symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    pub time: i64,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: f64,
    pub asset: String,
    pub symbol: String,
}
