//! Position conflict, merge and cooldown policy
//!
//! Consulted before every `open_position`. Cooldown state is in-memory
//! per process; conflict decisions come from the live trade rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;

use crate::config::TradingConfig;
use crate::db::Database;
use crate::models::Trade;

#[derive(Debug)]
pub enum ConflictDecision {
    Proceed,
    /// Same-side live trade exists; fold the new fill into the primary.
    Merge { primary: Trade },
    /// Opposite-side live trade exists; close it first, then open.
    Replace { existing: Trade },
    Reject { reason: String },
}

pub struct PositionManager {
    db: Arc<Database>,
    config: TradingConfig,
    symbol_attempts: Mutex<HashMap<String, Instant>>,
    trader_attempts: Mutex<HashMap<String, Instant>>,
}

impl PositionManager {
    pub fn new(db: Arc<Database>, config: TradingConfig) -> Self {
        Self {
            db,
            config,
            symbol_attempts: Mutex::new(HashMap::new()),
            trader_attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Cooldown gate. `has_position` extends the window. Returns the
    /// remaining cooldown when blocked.
    pub async fn check_cooldown(
        &self,
        coin_symbol: &str,
        trader: Option<&str>,
        has_position: bool,
    ) -> Option<Duration> {
        let window = if has_position {
            Duration::from_secs(self.config.position_cooldown_secs)
        } else {
            Duration::from_secs(self.config.trade_cooldown_secs)
        };
        {
            let attempts = self.symbol_attempts.lock().await;
            if let Some(last) = attempts.get(coin_symbol) {
                let elapsed = last.elapsed();
                if elapsed < window {
                    return Some(window - elapsed);
                }
            }
        }
        if self.config.trader_cooldown_secs > 0 {
            if let Some(trader) = trader {
                let window = Duration::from_secs(self.config.trader_cooldown_secs);
                let attempts = self.trader_attempts.lock().await;
                if let Some(last) = attempts.get(trader) {
                    let elapsed = last.elapsed();
                    if elapsed < window {
                        return Some(window - elapsed);
                    }
                }
            }
        }
        None
    }

    /// Record an attempt; a rapid repeat restarts (extends) the window.
    pub async fn touch(&self, coin_symbol: &str, trader: Option<&str>) {
        self.symbol_attempts
            .lock()
            .await
            .insert(coin_symbol.to_string(), Instant::now());
        if let Some(trader) = trader {
            self.trader_attempts
                .lock()
                .await
                .insert(trader.to_string(), Instant::now());
        }
    }

    /// Conflict policy against the live trades on this symbol. Merged
    /// secondaries are not conflicts in their own right.
    pub async fn evaluate(&self, trade: &Trade) -> Result<ConflictDecision> {
        let live: Vec<Trade> = self
            .db
            .live_trades_for_symbol(&trade.coin_symbol)
            .await?
            .into_iter()
            .filter(|t| t.id != trade.id && t.merged_into_trade_id.is_none())
            .collect();

        if live.is_empty() {
            return Ok(ConflictDecision::Proceed);
        }

        let same_side: Vec<&Trade> = live
            .iter()
            .filter(|t| t.position_type == trade.position_type)
            .collect();
        if let Some(primary) = same_side.first() {
            // MERGE while under the per-symbol trade limit, else REJECT.
            if (live.len() as u32) < self.config.max_position_trades {
                return Ok(ConflictDecision::Merge {
                    primary: (*primary).clone(),
                });
            }
            return Ok(ConflictDecision::Reject {
                reason: format!(
                    "{} already has {} open trades",
                    trade.coin_symbol,
                    live.len()
                ),
            });
        }

        // Opposite side: replace the existing position.
        Ok(ConflictDecision::Replace {
            existing: live[0].clone(),
        })
    }
}
