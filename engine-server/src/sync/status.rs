//! Status sync loop
//!
//! Probes the venue for every live trade younger than the age cutoff and
//! applies the resulting transition. A missing order means it filled and
//! left the book before we saw the report, so the trade closes. Probe
//! failures only increment the error counter: a placement that once
//! returned an order id can never be failed by an unlucky probe.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use venue_client::{FuturesVenue, VenueError};

use crate::db::Database;
use crate::models::TradeStatus;
use crate::pricing::PriceService;

use super::SyncTask;

/// Venue probes are spaced to stay well under the request budget.
const PROBE_SPACING: Duration = Duration::from_secs(1);

pub struct StatusSync {
    db: Arc<Database>,
    venue: Arc<dyn FuturesVenue>,
    max_age_hours: u64,
}

impl StatusSync {
    pub fn new(db: Arc<Database>, venue: Arc<dyn FuturesVenue>, max_age_hours: u64) -> Self {
        Self {
            db,
            venue,
            max_age_hours,
        }
    }

    async fn probe_trade(&self, trade: &crate::models::Trade) -> Result<()> {
        let Some(order_id) = trade.exchange_order_id.as_deref() else {
            return Ok(());
        };
        let pair = PriceService::resolve_pair(&trade.coin_symbol);

        match self.venue.get_order_status(&pair, order_id).await {
            Ok(order) => {
                self.db.record_status_probe(trade.id, &order.raw).await?;
                match order.status.as_str() {
                    "FILLED" if !order.reduce_only => {
                        if order.update_time > 0 {
                            self.db
                                .set_created_at_if_null(trade.id, order.update_time)
                                .await?;
                        }
                        if order.avg_price > 0.0 {
                            self.db
                                .record_entry_fill(trade.id, order.avg_price, order.executed_qty)
                                .await?;
                        }
                        self.db.transition_status(trade.id, TradeStatus::Open).await?;
                    }
                    "CANCELED" if order.executed_qty == 0.0 => {
                        self.db
                            .transition_status(trade.id, TradeStatus::Canceled)
                            .await?;
                    }
                    "EXPIRED" if order.executed_qty == 0.0 => {
                        self.db
                            .transition_status(trade.id, TradeStatus::Expired)
                            .await?;
                    }
                    _ => {}
                }
            }
            Err(VenueError::OrderNotFound { .. }) => {
                // Pruned from the venue's order history: closed or filled
                // long enough ago that only the position remains.
                info!(trade_id = trade.id, %order_id, "order not found, reconciling as closed");
                self.db
                    .close_trade(trade.id, None, None, chrono::Utc::now().timestamp_millis())
                    .await?;
            }
            Err(err) => {
                warn!(trade_id = trade.id, ?err, "status probe failed");
                self.db
                    .record_probe_failure(trade.id, &err.to_string())
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTask for StatusSync {
    async fn run(&self) -> Result<()> {
        let trades = self.db.live_trades_younger_than(self.max_age_hours).await?;
        for (i, trade) in trades.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(PROBE_SPACING).await;
            }
            self.probe_trade(trade).await?;
        }
        Ok(())
    }
}
