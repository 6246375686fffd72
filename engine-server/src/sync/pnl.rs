//! PnL backfill loop
//!
//! Fills in `pnl_usd` / `exit_price` on CLOSED trades from the venue's
//! account-trade and income history. The venue's realized PnL wins over
//! anything computed locally, and the lifecycle timestamps are never
//! touched. Income events are archived into `transaction_history` along
//! the way, deduplicated on the natural key.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use venue_client::FuturesVenue;

use crate::db::Database;
use crate::models::TransactionRow;
use crate::pricing::PriceService;

use super::SyncTask;

/// Slack on both sides of the trade's lifetime window.
const WINDOW_EPSILON_MS: i64 = 3_600_000;
const BATCH_LIMIT: i64 = 50;

pub struct PnlBackfill {
    db: Arc<Database>,
    venue: Arc<dyn FuturesVenue>,
}

impl PnlBackfill {
    pub fn new(db: Arc<Database>, venue: Arc<dyn FuturesVenue>) -> Self {
        Self { db, venue }
    }

    async fn backfill_trade(&self, trade: &crate::models::Trade) -> Result<()> {
        let Some(closed_at) = trade.closed_at else {
            debug!(trade_id = trade.id, "closed trade without closed_at, skipping backfill");
            return Ok(());
        };
        let start = trade.created_at.unwrap_or(trade.timestamp_ms) - WINDOW_EPSILON_MS;
        let end = closed_at + WINDOW_EPSILON_MS;
        let pair = PriceService::resolve_pair(&trade.coin_symbol);

        // Fills on the symbol within the lifetime window; exit legs are
        // the ones carrying realized PnL.
        let fills = self.venue.get_account_trades(&pair, start, end).await?;
        let mut realized = 0.0;
        let mut exit_notional = 0.0;
        let mut exit_qty = 0.0;
        for fill in &fills {
            if fill.realized_pnl.abs() > f64::EPSILON {
                realized += fill.realized_pnl;
                exit_notional += fill.price * fill.qty;
                exit_qty += fill.qty;
            }
        }

        let income = self.venue.get_income(start, end).await?;
        let mut income_pnl = 0.0;
        let mut saw_income = false;
        for event in &income {
            self.db
                .insert_transaction(&TransactionRow {
                    time: event.time,
                    tx_type: event.income_type.clone(),
                    amount: event.income,
                    asset: event.asset.clone(),
                    symbol: event.symbol.clone(),
                })
                .await?;
            if event.income_type == "REALIZED_PNL" && event.symbol == pair {
                income_pnl += event.income;
                saw_income = true;
            }
        }

        let pnl = if exit_qty > 0.0 {
            Some(realized)
        } else if saw_income {
            Some(income_pnl)
        } else {
            None
        };
        let exit_price = if exit_qty > 0.0 {
            Some(exit_notional / exit_qty)
        } else {
            None
        };

        if pnl.is_some() || exit_price.is_some() {
            self.db.backfill_pnl(trade.id, pnl, exit_price).await?;
            info!(trade_id = trade.id, ?pnl, ?exit_price, "pnl backfilled");
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTask for PnlBackfill {
    async fn run(&self) -> Result<()> {
        let trades = self.db.closed_trades_missing_pnl(BATCH_LIMIT).await?;
        for trade in &trades {
            self.backfill_trade(trade).await?;
        }
        Ok(())
    }
}
