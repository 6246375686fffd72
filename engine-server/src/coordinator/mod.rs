//! Trade coordinator
//!
//! The open/close/update primitives behind the per-symbol mailboxes.
//! Preflight failures move the row to FAILED/UNFILLED with a taxonomy
//! label; once the venue has returned an order id the trade is considered
//! placed and nothing short of a venue-confirmed terminal state may undo
//! that.

mod mailbox;
mod position_manager;


pub use mailbox::{SymbolCommand, SymbolCommandHandler, SymbolMailboxes};
pub use position_manager::{ConflictDecision, PositionManager};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use venue_client::{
    FailureKind, FuturesOrderType, FuturesVenue, NewOrder, OrderSide, PlacedOrder, SymbolFilters,
    VenueError,
};

use crate::config::TradingConfig;
use crate::db::Database;
use crate::fees::{FeeCalculator, FeePreview, Liquidity};
use crate::models::{
    AlertAction, AlertExecution, OrderKind, ProtectiveKind, ProtectiveOrder, Trade, TradeStatus,
};
use crate::pricing::PriceService;

/// Polling budget while waiting for a replaced position to flatten.
const REPLACE_CONFIRM_ATTEMPTS: u32 = 10;
const REPLACE_CONFIRM_DELAY: Duration = Duration::from_millis(500);

pub struct TradeCoordinator {
    db: Arc<Database>,
    venue: Arc<dyn FuturesVenue>,
    prices: PriceService,
    fees: FeeCalculator,
    positions: PositionManager,
    trading: TradingConfig,
}

impl TradeCoordinator {
    pub fn new(
        db: Arc<Database>,
        venue: Arc<dyn FuturesVenue>,
        fees: FeeCalculator,
        trading: TradingConfig,
    ) -> Self {
        Self {
            prices: PriceService::new(venue.clone()),
            positions: PositionManager::new(db.clone(), trading.clone()),
            db,
            venue,
            fees,
            trading,
        }
    }

    fn client_order_id() -> String {
        format!("pp{}", Uuid::new_v4().simple())
    }

    /// Open the position for a PENDING trade row. Every preflight check
    /// runs in the documented order; the first failure decides the row's
    /// terminal state.
    pub async fn open_position(&self, trade_id: i64) -> Result<()> {
        let Some(trade) = self.db.get_trade(trade_id).await? else {
            return Err(anyhow!("trade {trade_id} not found"));
        };
        // Only a PENDING row places an order; re-delivered signals are
        // no-ops here.
        if trade.status != TradeStatus::Pending {
            info!(
                trade_id,
                status = trade.status.as_str(),
                "skipping open: trade is not pending"
            );
            return Ok(());
        }

        // 1. Cooldown, extended when a position already exists.
        let has_position = !self
            .db
            .live_trades_for_symbol(&trade.coin_symbol)
            .await?
            .is_empty();
        if let Some(remaining) = self
            .positions
            .check_cooldown(&trade.coin_symbol, trade.trader.as_deref(), has_position)
            .await
        {
            self.positions
                .touch(&trade.coin_symbol, trade.trader.as_deref())
                .await;
            self.db
                .record_placement_failure(
                    trade.id,
                    "COOLDOWN",
                    &format!("{}s remaining", remaining.as_secs()),
                    TradeStatus::Failed,
                )
                .await?;
            return Ok(());
        }
        self.positions
            .touch(&trade.coin_symbol, trade.trader.as_deref())
            .await;

        // Conflict policy for the symbol.
        let mut merge_primary: Option<Trade> = None;
        match self.positions.evaluate(&trade).await? {
            ConflictDecision::Proceed => {}
            ConflictDecision::Merge { primary } => {
                info!(trade_id, primary_id = primary.id, "merging into existing position");
                merge_primary = Some(primary);
            }
            ConflictDecision::Replace { existing } => {
                info!(trade_id, existing_id = existing.id, "replacing opposite-side position");
                self.close_position(&existing, 100.0).await?;
                self.wait_position_flat(&existing.coin_symbol).await?;
            }
            ConflictDecision::Reject { reason } => {
                self.db
                    .record_placement_failure(trade.id, "POSITION_CONFLICT", &reason, TradeStatus::Failed)
                    .await?;
                return Ok(());
            }
        }

        // 2. Symbol support.
        let pair = PriceService::resolve_pair(&trade.coin_symbol);
        let filters = match self.prices.ensure_tradable(&pair).await {
            Ok(filters) => filters,
            Err(err) => {
                return self.fail_placement(&trade, &err).await;
            }
        };

        // 3. Reference price.
        let reference = match self.prices.reference_price(&pair).await {
            Ok(price) => price,
            Err(err) => return self.fail_placement(&trade, &err).await,
        };

        // 4. Price-proximity gate.
        let signal_price = trade
            .parsed_signal
            .limit_entry_price()
            .ok_or_else(|| anyhow!("signal without entry price"))?;
        let is_market = trade.signal_type == OrderKind::Market;
        let threshold = self
            .trading
            .proximity_threshold(&trade.coin_symbol, is_market);
        let drift = (signal_price - reference).abs() / reference;
        if drift > threshold {
            self.db
                .record_placement_failure(
                    trade.id,
                    FailureKind::PriceOutOfRange.as_str(),
                    &format!(
                        "signal {signal_price} vs market {reference} drift {:.4} > {threshold}",
                        drift
                    ),
                    TradeStatus::Failed,
                )
                .await?;
            return Ok(());
        }

        // 5/6. Sizing and precision clamp.
        let qty = match self.size_order(&trade, reference, &filters) {
            Ok(qty) => qty,
            Err(kind) => {
                self.db
                    .record_placement_failure(
                        trade.id,
                        kind.as_str(),
                        "sizing failed precision clamp",
                        TradeStatus::Failed,
                    )
                    .await?;
                return Ok(());
            }
        };

        // 7. Leverage binding. A refused leverage change is logged and
        // does not block the trade.
        if let Err(err) = self
            .venue
            .change_leverage(&pair, self.trading.leverage)
            .await
        {
            warn!(?err, %pair, "leverage change failed");
        }

        // 8. Fee preview travels with the in-memory result and the log.
        let entry_decimal = Decimal::from_f64(if is_market { reference } else { signal_price })
            .unwrap_or_default();
        let preview = self.fees.preview(
            entry_decimal,
            qty,
            trade.position_type,
            if is_market {
                Liquidity::Taker
            } else {
                Liquidity::Maker
            },
        );
        info!(
            trade_id,
            %pair,
            total_fee = %preview.total_fee,
            breakeven = %preview.breakeven_price,
            "fee preview"
        );

        // 9. Placement.
        let order = self.build_entry_order(&trade, qty, signal_price, &filters);
        let placed = match self.venue.create_futures_order(&order).await {
            Ok(placed) => placed,
            Err(err) => return self.fail_placement(&trade, &err).await,
        };
        if placed.order_id.is_empty() {
            return self
                .fail_placement(
                    &trade,
                    &VenueError::Malformed("placement response without orderId".into()),
                )
                .await;
        }

        // Success is the order id, independent of any later probe.
        let filled = placed.executed_qty > 0.0;
        let status = if is_market && !filled {
            TradeStatus::Unfilled
        } else {
            TradeStatus::Open
        };
        let entry_price = if filled && placed.avg_price > 0.0 {
            placed.avg_price
        } else if is_market {
            reference
        } else {
            signal_price
        };
        let size = if filled {
            placed.executed_qty
        } else {
            placed.orig_qty
        };
        self.db
            .record_placement_success(
                trade.id,
                &placed.order_id,
                Some(entry_price),
                Some(size),
                &placed.raw,
                status,
            )
            .await?;
        if filled {
            let at = if placed.update_time > 0 {
                placed.update_time
            } else {
                chrono::Utc::now().timestamp_millis()
            };
            self.db.set_created_at_if_null(trade.id, at).await?;
        }

        // 10. Protective orders.
        if status == TradeStatus::Open {
            if let Err(err) = self
                .install_protective_orders(&trade, &pair, size, &filters)
                .await
            {
                warn!(?err, trade_id, "protective order installation failed");
                self.db
                    .flag_sync_issue(trade.id, &format!("tp/sl install failed: {err}"), false)
                    .await?;
            }
        }

        // Merge bookkeeping after a same-side open that actually holds.
        if status == TradeStatus::Open {
            if let Some(primary) = merge_primary {
                self.record_merge(&trade, &primary, entry_price, size).await?;
            }
        }

        info!(trade_id, order_id = %placed.order_id, status = status.as_str(), "position opened");
        Ok(())
    }

    /// Fold a freshly opened same-side trade into the surviving primary:
    /// volume-weighted entry, enlarged size, merge markers on the
    /// secondary.
    async fn record_merge(
        &self,
        secondary: &Trade,
        primary: &Trade,
        fill_price: f64,
        fill_size: f64,
    ) -> Result<()> {
        let primary_entry = primary.effective_entry().unwrap_or(fill_price);
        let primary_size = primary.position_size.unwrap_or(0.0);
        let fills = [
            (
                Decimal::from_f64(primary_entry).unwrap_or_default(),
                Decimal::from_f64(primary_size).unwrap_or_default(),
            ),
            (
                Decimal::from_f64(fill_price).unwrap_or_default(),
                Decimal::from_f64(fill_size).unwrap_or_default(),
            ),
        ];
        let merged_entry = crate::fees::weighted_entry(&fills)
            .and_then(|d| d.to_f64())
            .unwrap_or(fill_price);
        self.db
            .record_merge_primary(primary.id, merged_entry, primary_size + fill_size)
            .await?;
        self.db
            .mark_merged(secondary.id, primary.id, "same-side signal merged")
            .await?;
        Ok(())
    }

    /// Expected fees for an entry about to be placed; exposed for tests.
    pub fn fee_preview(&self, entry: Decimal, qty: Decimal, trade: &Trade) -> FeePreview {
        self.fees
            .preview(entry, qty, trade.position_type, Liquidity::Taker)
    }

    fn size_order(
        &self,
        trade: &Trade,
        reference: f64,
        filters: &SymbolFilters,
    ) -> std::result::Result<Decimal, FailureKind> {
        let notional = Decimal::from_f64(self.trading.trade_amount).unwrap_or_default();
        let price = Decimal::from_f64(reference).ok_or(FailureKind::PriceOutOfRange)?;
        if price <= Decimal::ZERO {
            return Err(FailureKind::PriceOutOfRange);
        }
        let mut qty = notional / price;
        if let Some(multiplier) = trade.parsed_signal.quantity_multiplier {
            qty *= Decimal::from(multiplier);
        }
        let qty = filters.quantize_qty(qty);
        filters.validate(qty, price).map_err(|violation| match violation {
            venue_client::filters::FilterViolation::BelowMinNotional => FailureKind::NotionalTooSmall,
            _ => FailureKind::QtyOutOfBounds,
        })?;
        Ok(qty)
    }

    fn build_entry_order(
        &self,
        trade: &Trade,
        qty: Decimal,
        signal_price: f64,
        filters: &SymbolFilters,
    ) -> NewOrder {
        let pair = PriceService::resolve_pair(&trade.coin_symbol);
        let side = trade.entry_side();
        match trade.signal_type {
            OrderKind::Market => NewOrder::market(&pair, side, qty, Self::client_order_id()),
            OrderKind::Limit => {
                let price = filters
                    .quantize_price(Decimal::from_f64(signal_price).unwrap_or_default());
                NewOrder::limit(&pair, side, qty, price, Self::client_order_id())
            }
        }
    }

    async fn fail_placement(&self, trade: &Trade, err: &VenueError) -> Result<()> {
        let kind = err.failure_kind();
        match kind {
            Some(kind) if err.is_terminal_placement_failure() => {
                self.db
                    .record_placement_failure(
                        trade.id,
                        kind.as_str(),
                        &err.to_string(),
                        TradeStatus::Failed,
                    )
                    .await?;
            }
            _ => {
                // Transient or probe-class: the row stays PENDING and the
                // issue is recorded for the next reconciliation pass.
                warn!(trade_id = trade.id, ?err, "placement attempt did not complete");
                self.db
                    .flag_sync_issue(trade.id, &format!("placement error: {err}"), false)
                    .await?;
            }
        }
        Ok(())
    }

    async fn wait_position_flat(&self, coin_symbol: &str) -> Result<()> {
        let pair = PriceService::resolve_pair(coin_symbol);
        for _ in 0..REPLACE_CONFIRM_ATTEMPTS {
            match self.venue.get_position_risk(Some(&pair)).await {
                Ok(positions) => {
                    let open = positions.iter().any(|p| p.symbol == pair && p.is_open());
                    if !open {
                        return Ok(());
                    }
                }
                Err(err) => warn!(?err, %pair, "position poll failed while replacing"),
            }
            tokio::time::sleep(REPLACE_CONFIRM_DELAY).await;
        }
        Err(anyhow!("{pair}: position did not flatten before replacement"))
    }

    /// Install SL and TP orders for a freshly opened position. Uses the
    /// venue's position-scoped close orders when supported, reduce-only
    /// quantity orders otherwise or as fallback.
    async fn install_protective_orders(
        &self,
        trade: &Trade,
        pair: &str,
        size: f64,
        filters: &SymbolFilters,
    ) -> Result<()> {
        if trade.parsed_signal.stop_loss.is_none() && trade.parsed_signal.take_profits.is_empty() {
            return Ok(());
        }
        let mut installed: Vec<ProtectiveOrder> = Vec::new();
        let position_scoped = self
            .venue
            .change_position_tpsl_mode(pair, true)
            .await
            .unwrap_or(false);
        let exit_side = trade.exit_side();
        let size_decimal = Decimal::from_f64(size).unwrap_or_default();

        if let Some(stop) = trade.parsed_signal.stop_loss {
            let order = self
                .place_protective(
                    pair,
                    exit_side,
                    FuturesOrderType::StopMarket,
                    stop,
                    size_decimal,
                    position_scoped,
                    filters,
                )
                .await?;
            installed.push(ProtectiveOrder {
                order_id: order.order_id,
                kind: ProtectiveKind::StopLoss,
                trigger_price: stop,
                level: None,
            });
        }

        let tps = &trade.parsed_signal.take_profits;
        if !tps.is_empty() {
            // One TP may close the whole position; multiple levels split
            // the size into reduce-only slices.
            let per_level = if tps.len() == 1 {
                size_decimal
            } else {
                filters.quantize_qty(size_decimal / Decimal::from(tps.len() as u32))
            };
            for (level, tp) in tps.iter().enumerate() {
                let scoped = position_scoped && tps.len() == 1;
                let order = self
                    .place_protective(
                        pair,
                        exit_side,
                        FuturesOrderType::TakeProfitMarket,
                        *tp,
                        per_level,
                        scoped,
                        filters,
                    )
                    .await?;
                installed.push(ProtectiveOrder {
                    order_id: order.order_id,
                    kind: ProtectiveKind::TakeProfit,
                    trigger_price: *tp,
                    level: Some(level as u32 + 1),
                });
            }
        }

        if !installed.is_empty() {
            self.db.update_tp_sl_orders(trade.id, &installed).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn place_protective(
        &self,
        pair: &str,
        side: OrderSide,
        order_type: FuturesOrderType,
        trigger: f64,
        qty: Decimal,
        position_scoped: bool,
        filters: &SymbolFilters,
    ) -> Result<PlacedOrder> {
        let stop_price = filters.quantize_price(Decimal::from_f64(trigger).unwrap_or_default());
        let mut order = NewOrder {
            symbol: pair.to_string(),
            side,
            order_type,
            quantity: if position_scoped { None } else { Some(qty) },
            price: None,
            stop_price: Some(stop_price),
            reduce_only: !position_scoped,
            close_position: position_scoped,
            client_order_id: Self::client_order_id(),
        };
        match self.venue.create_futures_order(&order).await {
            Ok(placed) => Ok(placed),
            Err(err) if position_scoped => {
                // Position-mode rejected: retry as a plain reduce-only
                // stop with an explicit quantity.
                warn!(?err, %pair, "position-scoped protective order failed, falling back");
                order.close_position = false;
                order.reduce_only = true;
                order.quantity = Some(qty);
                order.client_order_id = Self::client_order_id();
                Ok(self.venue.create_futures_order(&order).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Close `percent` of the live position at market, reduce-only.
    /// Returns the outcome payload recorded on the triggering alert.
    pub async fn close_position(&self, trade: &Trade, percent: f64) -> Result<serde_json::Value> {
        let pair = PriceService::resolve_pair(&trade.coin_symbol);
        let positions = self.venue.get_position_risk(Some(&pair)).await?;
        let Some(position) = positions.iter().find(|p| p.symbol == pair && p.is_open()) else {
            // Nothing on the venue: reconcile the row and report.
            self.db
                .close_trade(trade.id, None, None, chrono::Utc::now().timestamp_millis())
                .await?;
            return Ok(json!({ "error": "position already closed" }));
        };

        let filters = self.prices.ensure_tradable(&pair).await?;
        let size = position.position_amt.abs();
        let size_decimal = Decimal::from_f64(size).unwrap_or_default();
        let fraction = Decimal::from_f64(percent / 100.0).unwrap_or(Decimal::ONE);
        let qty = filters.quantize_qty(size_decimal * fraction);
        if qty <= Decimal::ZERO {
            return Ok(json!({ "error": "close quantity rounds to zero" }));
        }

        let mut order = NewOrder::market(
            &pair,
            position.side().opposite(),
            qty,
            Self::client_order_id(),
        );
        order.reduce_only = true;
        let placed = self.venue.create_futures_order(&order).await?;

        let exit_price = if placed.avg_price > 0.0 {
            placed.avg_price
        } else {
            position.mark_price
        };
        let closed_qty = qty.to_f64().unwrap_or(0.0);
        let full_close = percent >= 100.0 || (size - closed_qty) < f64::EPSILON;
        let now_ms = chrono::Utc::now().timestamp_millis();

        if full_close {
            let entry = trade.effective_entry().unwrap_or(position.entry_price);
            let direction = match trade.position_type {
                crate::models::PositionType::Long => 1.0,
                crate::models::PositionType::Short => -1.0,
            };
            let pnl = (exit_price - entry) * closed_qty * direction;
            self.db
                .close_trade(trade.id, Some(exit_price), Some(pnl), now_ms)
                .await?;
        } else {
            self.db
                .record_partial_close(trade.id, size - closed_qty)
                .await?;
        }

        Ok(json!({
            "closed_percent": percent,
            "closed_qty": closed_qty,
            "exit_price": exit_price,
            "full_close": full_close,
            "order": placed.raw,
        }))
    }

    /// Cancel every reduce-only stop for the symbol and re-arm the SL at
    /// `new_price`. The venue has no amend; update is cancel + create.
    pub async fn update_stop_loss(
        &self,
        trade: &Trade,
        new_price: f64,
    ) -> Result<serde_json::Value> {
        let pair = PriceService::resolve_pair(&trade.coin_symbol);
        let filters = self.prices.ensure_tradable(&pair).await?;

        let open_orders = self.venue.get_open_orders(Some(&pair)).await?;
        let mut cancelled = Vec::new();
        for order in open_orders
            .iter()
            .filter(|o| o.reduce_only && o.order_type.contains("STOP"))
        {
            match self
                .venue
                .cancel_futures_order(&pair, &order.order_id)
                .await
            {
                Ok(_) => cancelled.push(order.order_id.clone()),
                Err(err) => warn!(?err, order_id = %order.order_id, "stale stop cancel failed"),
            }
        }

        let positions = self.venue.get_position_risk(Some(&pair)).await?;
        let Some(position) = positions.iter().find(|p| p.symbol == pair && p.is_open()) else {
            return Ok(json!({ "error": "no live position for stop update", "cancelled": cancelled }));
        };
        let qty = filters.quantize_qty(
            Decimal::from_f64(position.position_amt.abs()).unwrap_or_default(),
        );

        let position_scoped = self
            .venue
            .change_position_tpsl_mode(&pair, true)
            .await
            .unwrap_or(false);
        let placed = self
            .place_protective(
                &pair,
                trade.exit_side(),
                FuturesOrderType::StopMarket,
                new_price,
                qty,
                position_scoped,
                &filters,
            )
            .await?;

        // Replace the SL entry; TP bookkeeping stays.
        let mut orders: Vec<ProtectiveOrder> = trade
            .tp_sl_orders
            .iter()
            .filter(|o| o.kind == ProtectiveKind::TakeProfit)
            .cloned()
            .collect();
        orders.push(ProtectiveOrder {
            order_id: placed.order_id.clone(),
            kind: ProtectiveKind::StopLoss,
            trigger_price: new_price,
            level: None,
        });
        self.db.update_tp_sl_orders(trade.id, &orders).await?;

        Ok(json!({
            "cancelled": cancelled,
            "new_stop": new_price,
            "order": placed.raw,
        }))
    }

    /// Cancel a pending entry order.
    pub async fn cancel_entry(&self, trade: &Trade) -> Result<serde_json::Value> {
        let pair = PriceService::resolve_pair(&trade.coin_symbol);
        let Some(order_id) = trade.exchange_order_id.as_deref() else {
            self.db
                .transition_status(trade.id, TradeStatus::Canceled)
                .await?;
            return Ok(json!({ "error": "no entry order to cancel" }));
        };
        let cancelled = self.venue.cancel_futures_order(&pair, order_id).await?;
        self.db
            .transition_status(trade.id, TradeStatus::Canceled)
            .await?;
        Ok(json!({ "cancelled_order": cancelled.raw }))
    }

    /// Run a classified alert action against its parent trade, recording
    /// the outcome on the alert row.
    pub async fn execute_alert(
        &self,
        trade: &Trade,
        alert_id: i64,
        action: AlertAction,
    ) -> Result<()> {
        let outcome = match action.execution() {
            AlertExecution::ClosePercent(percent) => self.close_position(trade, percent).await,
            AlertExecution::MoveStopToBreakeven => {
                match trade.effective_entry() {
                    Some(entry) => self.update_stop_loss(trade, entry).await,
                    None => Ok(json!({ "error": "no effective entry for breakeven stop" })),
                }
            }
            AlertExecution::CancelEntry => self.cancel_entry(trade).await,
        };

        match outcome {
            Ok(payload) => {
                self.db.update_alert_response(alert_id, &payload).await?;
            }
            Err(err) => {
                error!(?err, alert_id, trade_id = trade.id, "alert execution failed");
                self.db
                    .update_alert_response(alert_id, &json!({ "error": err.to_string() }))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SymbolCommandHandler for TradeCoordinator {
    async fn handle(&self, coin_symbol: &str, command: SymbolCommand) {
        match command {
            SymbolCommand::OpenPosition { trade_id } => {
                if let Err(err) = self.open_position(trade_id).await {
                    error!(?err, trade_id, %coin_symbol, "open_position failed");
                }
            }
            SymbolCommand::ExecuteAlert {
                trade_id,
                alert_id,
                action,
            } => {
                let trade = match self.db.get_trade(trade_id).await {
                    Ok(Some(trade)) => trade,
                    Ok(None) => {
                        error!(trade_id, "alert for unknown trade");
                        return;
                    }
                    Err(err) => {
                        error!(?err, trade_id, "trade load failed");
                        return;
                    }
                };
                if let Err(err) = self.execute_alert(&trade, alert_id, action).await {
                    error!(?err, trade_id, alert_id, "execute_alert failed");
                }
            }
        }
    }
}
