//! Orphan cleanup loop
//!
//! A reduce-only order on a symbol with no live position can never
//! execute and silently holds margin tiers hostage; cancel it. Orders
//! whose owning trade was merged into another position are left alone:
//! the aggregate position lives on under the primary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use venue_client::FuturesVenue;

use crate::db::Database;

use super::SyncTask;

pub struct OrphanCleanup {
    db: Arc<Database>,
    venue: Arc<dyn FuturesVenue>,
}

impl OrphanCleanup {
    pub fn new(db: Arc<Database>, venue: Arc<dyn FuturesVenue>) -> Self {
        Self { db, venue }
    }
}

#[async_trait]
impl SyncTask for OrphanCleanup {
    async fn run(&self) -> Result<()> {
        let open_orders = self.venue.get_open_orders(None).await?;
        let positions = self.venue.get_position_risk(None).await?;

        let held_symbols: HashSet<&str> = positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.symbol.as_str())
            .collect();

        // Map protective order ids back to their owning trades so merged
        // secondaries can be recognized.
        let mut merged_order_ids: HashMap<String, i64> = HashMap::new();
        for trade in self.db.live_trades().await? {
            if trade.merged_into_trade_id.is_some() {
                for order in &trade.tp_sl_orders {
                    merged_order_ids.insert(order.order_id.clone(), trade.id);
                }
            }
        }

        for order in open_orders.iter().filter(|o| o.reduce_only) {
            if held_symbols.contains(order.symbol.as_str()) {
                continue;
            }
            if let Some(trade_id) = merged_order_ids.get(&order.order_id) {
                info!(
                    order_id = %order.order_id,
                    trade_id,
                    "skipping reduce-only order owned by merged trade"
                );
                continue;
            }
            match self
                .venue
                .cancel_futures_order(&order.symbol, &order.order_id)
                .await
            {
                Ok(_) => info!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    "orphaned reduce-only order cancelled"
                ),
                Err(err) => warn!(
                    ?err,
                    order_id = %order.order_id,
                    "orphan cancel failed"
                ),
            }
        }
        Ok(())
    }
}
