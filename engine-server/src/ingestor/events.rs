//! Execution-report application
//!
//! Turns user-data stream events into trade-row writes. Lifecycle
//! timestamps are check-and-set against NULL: a replayed or duplicated
//! event can never move `created_at`/`closed_at` once written.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};
use venue_client::binance::stream::{AccountUpdate, OrderUpdate};

use crate::db::Database;
use crate::models::{PositionType, TradeStatus};

/// Residual position below this fraction of the fill counts as flat.
const FULL_CLOSE_EPSILON: f64 = 1e-9;

pub async fn apply_order_update(db: &Arc<Database>, update: &OrderUpdate) -> Result<()> {
    let order_id = update.order_id.to_string();
    let Some(trade) = db.find_trade_by_order_id(&order_id).await? else {
        debug!(%order_id, symbol = %update.symbol, "execution report for unknown order");
        return Ok(());
    };

    match update.order_status.as_str() {
        "FILLED" | "PARTIALLY_FILLED" if !update.reduce_only => {
            // Entry fill: first execution report stamps created_at.
            db.set_created_at_if_null(trade.id, update.trade_time).await?;
            let entry_price = if update.avg_price > 0.0 {
                update.avg_price
            } else {
                update.last_filled_price
            };
            db.record_entry_fill(trade.id, entry_price, update.cum_filled_qty)
                .await?;
            db.transition_status(trade.id, TradeStatus::Open).await?;
            info!(
                trade_id = trade.id,
                %order_id,
                qty = update.cum_filled_qty,
                price = entry_price,
                "entry fill applied"
            );
        }
        "FILLED" | "PARTIALLY_FILLED" => {
            // Reduce-only fill: an exit leg.
            let exit_price = if update.avg_price > 0.0 {
                update.avg_price
            } else {
                update.last_filled_price
            };
            let held = trade.position_size.unwrap_or(0.0);
            let remaining = held - update.cum_filled_qty;
            let fully_closed =
                update.order_status == "FILLED" && remaining <= held.abs() * FULL_CLOSE_EPSILON + f64::EPSILON;
            if fully_closed {
                let pnl = if update.realized_profit.abs() > f64::EPSILON {
                    Some(update.realized_profit)
                } else {
                    trade.effective_entry().map(|entry| {
                        let direction = match trade.position_type {
                            PositionType::Long => 1.0,
                            PositionType::Short => -1.0,
                        };
                        (exit_price - entry) * update.cum_filled_qty * direction
                    })
                };
                db.close_trade(trade.id, Some(exit_price), pnl, update.trade_time)
                    .await?;
                info!(trade_id = trade.id, %order_id, exit_price, "full close applied");
            } else {
                db.record_partial_close(trade.id, remaining.max(0.0)).await?;
                info!(
                    trade_id = trade.id,
                    %order_id,
                    remaining,
                    "partial close applied"
                );
            }
        }
        "CANCELED" | "EXPIRED" => {
            if update.cum_filled_qty > 0.0 {
                // A cancel after partial fills leaves a live position; the
                // audit loop owns that divergence.
                warn!(
                    trade_id = trade.id,
                    %order_id,
                    filled = update.cum_filled_qty,
                    "order cancelled with fills"
                );
                return Ok(());
            }
            let next = if update.order_status == "CANCELED" {
                TradeStatus::Canceled
            } else {
                TradeStatus::Expired
            };
            db.transition_status(trade.id, next).await?;
        }
        "NEW" => {}
        other => {
            debug!(%order_id, status = other, "ignoring execution status");
        }
    }
    Ok(())
}

/// Balance deltas from ACCOUNT_UPDATE land in the balances table; the
/// position payload is left to the audit loop, which sees the venue's
/// authoritative snapshot.
pub async fn apply_account_update(
    db: &Arc<Database>,
    platform: &str,
    update: &AccountUpdate,
) -> Result<()> {
    for balance in &update.account.balances {
        db.upsert_balance(
            platform,
            "futures",
            &balance.asset,
            balance.cross_wallet_balance,
            (balance.wallet_balance - balance.cross_wallet_balance).max(0.0),
            balance.wallet_balance,
            0.0,
        )
        .await?;
    }
    Ok(())
}
