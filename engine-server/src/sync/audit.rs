//! Active-futures audit loop
//!
//! Every open venue position must be explained by a live local trade.
//! Matching is scored: symbol 0.5, side 0.3, size proximity up to 0.2.
//! Anything under the confidence threshold flags the closest candidate
//! for manual verification, or (by policy) opens a synthetic row so the
//! position is at least tracked.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use venue_client::{FuturesVenue, OrderSide, PositionRisk};

use crate::db::Database;
use crate::models::{OrderKind, ParsedSignal, PositionType, Trade};
use crate::pricing::PriceService;

use super::SyncTask;

const SYMBOL_WEIGHT: f64 = 0.5;
const SIDE_WEIGHT: f64 = 0.3;
const SIZE_WEIGHT: f64 = 0.2;

pub struct PositionAudit {
    db: Arc<Database>,
    venue: Arc<dyn FuturesVenue>,
    confidence_threshold: f64,
    create_synthetic: bool,
}

impl PositionAudit {
    pub fn new(
        db: Arc<Database>,
        venue: Arc<dyn FuturesVenue>,
        confidence_threshold: f64,
        create_synthetic: bool,
    ) -> Self {
        Self {
            db,
            venue,
            confidence_threshold,
            create_synthetic,
        }
    }

    /// Match confidence between a venue position and a local trade.
    pub fn confidence(position: &PositionRisk, trade: &Trade) -> f64 {
        let mut score = 0.0;
        if PriceService::resolve_pair(&trade.coin_symbol) == position.symbol {
            score += SYMBOL_WEIGHT;
        }
        let trade_side = match trade.position_type {
            PositionType::Long => OrderSide::Buy,
            PositionType::Short => OrderSide::Sell,
        };
        if trade_side == position.side() {
            score += SIDE_WEIGHT;
        }
        let venue_size = position.position_amt.abs();
        if venue_size > 0.0 {
            if let Some(local_size) = trade.position_size {
                let proximity = 1.0 - ((local_size - venue_size).abs() / venue_size).min(1.0);
                score += SIZE_WEIGHT * proximity;
            }
        }
        score
    }

    async fn audit_position(&self, position: &PositionRisk, local: &[Trade]) -> Result<()> {
        let best = local
            .iter()
            .map(|trade| (Self::confidence(position, trade), trade))
            .max_by(|(a, _), (b, _)| a.total_cmp(b));

        match best {
            Some((score, _)) if score >= self.confidence_threshold => Ok(()),
            Some((score, trade)) => {
                warn!(
                    symbol = %position.symbol,
                    trade_id = trade.id,
                    score,
                    "venue position only weakly matches local trade"
                );
                self.db
                    .flag_sync_issue(
                        trade.id,
                        &format!(
                            "audit: venue position {} (size {}) matched with confidence {score:.2}",
                            position.symbol, position.position_amt
                        ),
                        true,
                    )
                    .await
            }
            None => {
                warn!(symbol = %position.symbol, "venue position with no local trade");
                if self.create_synthetic {
                    let coin = position
                        .symbol
                        .strip_suffix("USDT")
                        .unwrap_or(&position.symbol);
                    let parsed = ParsedSignal {
                        coin_symbol: coin.to_string(),
                        position_type: if position.side() == OrderSide::Buy {
                            PositionType::Long
                        } else {
                            PositionType::Short
                        },
                        entry_prices: vec![position.entry_price],
                        stop_loss: None,
                        take_profits: vec![],
                        order_type: OrderKind::Market,
                        quantity_multiplier: None,
                    };
                    let trade = self
                        .db
                        .insert_synthetic_trade(
                            coin,
                            &parsed,
                            position.position_amt.abs(),
                            position.entry_price,
                        )
                        .await?;
                    info!(trade_id = trade.id, symbol = %position.symbol, "synthetic trade opened from audit");
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SyncTask for PositionAudit {
    async fn run(&self) -> Result<()> {
        let positions = self.venue.get_position_risk(None).await?;
        let live = self.db.live_trades().await?;
        for position in positions.iter().filter(|p| p.is_open()) {
            let candidates: Vec<Trade> = live
                .iter()
                .filter(|t| PriceService::resolve_pair(&t.coin_symbol) == position.symbol)
                .cloned()
                .collect();
            self.audit_position(position, &candidates).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sync::SyncTask;
    use crate::test_support::{open_market_trade, position, MockVenue};

    #[tokio::test]
    async fn matched_position_passes_audit() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let trade = open_market_trade(&db, "sig", "SOL").await;

        let mut venue = MockVenue::new();
        let size = trade.position_size.unwrap();
        venue
            .expect_get_position_risk()
            .returning(move |_| Ok(vec![position("SOLUSDT", size, 140.0)]));

        let audit = PositionAudit::new(db.clone(), Arc::new(venue), 0.8, false);
        audit.run().await.unwrap();

        let trade = db.get_trade(trade.id).await.unwrap().unwrap();
        assert!(!trade.manual_verification_needed);
    }

    #[tokio::test]
    async fn size_divergence_flags_manual_verification() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let trade = open_market_trade(&db, "sig", "SOL").await;

        let mut venue = MockVenue::new();
        // Venue holds 10x the local size: symbol+side match (0.8) but
        // size proximity contributes nothing, landing under 0.9.
        venue
            .expect_get_position_risk()
            .returning(|_| Ok(vec![position("SOLUSDT", 31.7, 140.0)]));

        let audit = PositionAudit::new(db.clone(), Arc::new(venue), 0.9, false);
        audit.run().await.unwrap();

        let trade = db.get_trade(trade.id).await.unwrap().unwrap();
        assert!(trade.manual_verification_needed);
    }

    #[tokio::test]
    async fn unmatched_position_opens_synthetic_row_when_enabled() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());

        let mut venue = MockVenue::new();
        venue
            .expect_get_position_risk()
            .returning(|_| Ok(vec![position("DOGEUSDT", -1000.0, 0.31)]));

        let audit = PositionAudit::new(db.clone(), Arc::new(venue), 0.8, true);
        audit.run().await.unwrap();

        let trades = db.live_trades_for_symbol("DOGE").await.unwrap();
        assert_eq!(trades.len(), 1);
        assert!(trades[0].manual_verification_needed);
        assert_eq!(trades[0].position_type, PositionType::Short);
        assert_eq!(trades[0].position_size, Some(1000.0));
    }
}
