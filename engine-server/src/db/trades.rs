//! Trade row CRUD and lifecycle writes
//!
//! All status changes go through [`Database::transition_status`], which
//! enforces the lifecycle graph: an illegal transition is refused and the
//! row is flagged for manual verification instead of silently clobbered.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::models::{
    OrderKind, ParsedSignal, PositionType, ProtectiveOrder, Trade, TradeStatus,
};

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let parsed_signal: String = row.get("parsed_signal");
    let tp_sl_orders: String = row.get("tp_sl_orders");
    let sync_issues: String = row.get("sync_issues");
    let status: String = row.get("status");
    let signal_type: String = row.get("signal_type");
    let position_type: String = row.get("position_type");

    let parse_json = |name: &str| -> Result<Option<serde_json::Value>> {
        let raw: Option<String> = row.get(name);
        Ok(match raw {
            Some(s) if !s.is_empty() => Some(serde_json::from_str(&s)?),
            _ => None,
        })
    };

    Ok(Trade {
        id: row.get("id"),
        discord_id: row.get("discord_id"),
        timestamp_ms: row.get("timestamp"),
        coin_symbol: row.get("coin_symbol"),
        trader: row.get("trader"),
        parsed_signal: serde_json::from_str(&parsed_signal)?,
        signal_type: OrderKind::parse(&signal_type)
            .ok_or_else(|| anyhow!("bad signal_type {signal_type:?}"))?,
        position_type: PositionType::parse(&position_type)
            .ok_or_else(|| anyhow!("bad position_type {position_type:?}"))?,
        status: TradeStatus::parse(&status).ok_or_else(|| anyhow!("bad status {status:?}"))?,
        entry_price: row.get("entry_price"),
        binance_entry_price: row.get("binance_entry_price"),
        exit_price: row.get("exit_price"),
        position_size: row.get("position_size"),
        exchange_order_id: row.get("exchange_order_id"),
        original_order_response: parse_json("original_order_response")?,
        binance_response: parse_json("binance_response")?,
        order_status_response: parse_json("order_status_response")?,
        tp_sl_orders: serde_json::from_str(&tp_sl_orders)?,
        pnl_usd: row.get("pnl_usd"),
        sync_error_count: row.get("sync_error_count"),
        sync_issues: serde_json::from_str(&sync_issues)?,
        manual_verification_needed: row.get::<i64, _>("manual_verification_needed") != 0,
        created_at: row.get("created_at"),
        closed_at: row.get("closed_at"),
        updated_at: row.get("updated_at"),
        merged_into_trade_id: row.get("merged_into_trade_id"),
        merge_reason: row.get("merge_reason"),
        merged_at: row.get("merged_at"),
    })
}

impl Database {
    /// Insert a fresh PENDING trade row bound to the signal instant.
    pub async fn insert_trade(
        &self,
        discord_id: &str,
        timestamp_ms: i64,
        trader: Option<&str>,
        parsed: &ParsedSignal,
    ) -> Result<Trade> {
        let parsed_json = serde_json::to_string(parsed)?;
        sqlx::query(
            r#"
            INSERT INTO trades (discord_id, timestamp, coin_symbol, trader,
                                parsed_signal, signal_type, position_type, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING')
            "#,
        )
        .bind(discord_id)
        .bind(timestamp_ms)
        .bind(&parsed.coin_symbol)
        .bind(trader)
        .bind(&parsed_json)
        .bind(parsed.order_type.as_str())
        .bind(parsed.position_type.as_str())
        .execute(&self.pool)
        .await?;

        self.get_trade_by_discord_id(discord_id)
            .await?
            .ok_or_else(|| anyhow!("failed to retrieve inserted trade"))
    }

    pub async fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    pub async fn get_trade_by_discord_id(&self, discord_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE discord_id = ?")
            .bind(discord_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    /// The idempotent binding lookup: one-millisecond window at the
    /// signal instant.
    pub async fn find_trade_by_timestamp(&self, timestamp_ms: i64) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE timestamp >= ? AND timestamp < ?")
            .bind(timestamp_ms)
            .bind(timestamp_ms + 1)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    /// Resolve a trade from an execution report. Falls back to scanning
    /// the stored venue payload for the id.
    pub async fn find_trade_by_order_id(&self, order_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE exchange_order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Some(trade_from_row(&row)?));
        }
        let needle = format!("%\"orderId\":{order_id}%");
        let row = sqlx::query("SELECT * FROM trades WHERE binance_response LIKE ?")
            .bind(&needle)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    pub async fn list_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY timestamp DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Trades holding (or possibly holding) a live position.
    pub async fn live_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE status IN ('OPEN', 'PARTIALLY_CLOSED') ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    pub async fn live_trades_for_symbol(&self, coin_symbol: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades
             WHERE coin_symbol = ? AND status IN ('OPEN', 'PARTIALLY_CLOSED')
             ORDER BY id",
        )
        .bind(coin_symbol)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Live trades younger than `max_age_hours`, for the status-sync loop.
    pub async fn live_trades_younger_than(&self, max_age_hours: u64) -> Result<Vec<Trade>> {
        let cutoff = chrono::Utc::now().timestamp_millis() - (max_age_hours as i64) * 3_600_000;
        let rows = sqlx::query(
            "SELECT * FROM trades
             WHERE status IN ('OPEN', 'PARTIALLY_CLOSED') AND timestamp >= ?
             ORDER BY id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// CLOSED trades still missing PnL or exit price, for the backfill loop.
    pub async fn closed_trades_missing_pnl(&self, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades
             WHERE status = 'CLOSED' AND (pnl_usd IS NULL OR exit_price IS NULL)
             ORDER BY id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Apply a lifecycle transition. Returns `false` (and flags the row)
    /// when the transition is illegal; the row is left untouched
    /// otherwise.
    pub async fn transition_status(&self, id: i64, next: TradeStatus) -> Result<bool> {
        let Some(trade) = self.get_trade(id).await? else {
            return Err(anyhow!("trade {id} not found"));
        };
        if trade.status == next {
            return Ok(true);
        }
        if !trade.status.can_transition_to(next) {
            self.flag_sync_issue(
                id,
                &format!(
                    "refused transition {} -> {}",
                    trade.status.as_str(),
                    next.as_str()
                ),
                true,
            )
            .await?;
            return Ok(false);
        }
        sqlx::query("UPDATE trades SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(next.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    /// Persist a successful placement. `original_order_response` is
    /// written only when still NULL; the latest payload always lands in
    /// `binance_response`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_placement_success(
        &self,
        id: i64,
        exchange_order_id: &str,
        entry_price: Option<f64>,
        position_size: Option<f64>,
        response: &serde_json::Value,
        status: TradeStatus,
    ) -> Result<()> {
        let response_json = serde_json::to_string(response)?;
        sqlx::query(
            r#"
            UPDATE trades
            SET exchange_order_id = ?,
                entry_price = COALESCE(?, entry_price),
                binance_entry_price = COALESCE(?, binance_entry_price),
                position_size = COALESCE(?, position_size),
                original_order_response = CASE
                    WHEN original_order_response IS NULL THEN ?
                    ELSE original_order_response
                END,
                binance_response = ?,
                status = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(exchange_order_id)
        .bind(entry_price)
        .bind(entry_price)
        .bind(position_size)
        .bind(&response_json)
        .bind(&response_json)
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a placement failure with its taxonomy label.
    pub async fn record_placement_failure(
        &self,
        id: i64,
        reason: &str,
        detail: &str,
        status: TradeStatus,
    ) -> Result<()> {
        let payload = serde_json::json!({ "error": reason, "detail": detail });
        sqlx::query(
            r#"
            UPDATE trades
            SET status = ?,
                binance_response = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(payload.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A successful status probe: touches only the probe fields, never
    /// the placement record.
    pub async fn record_status_probe(&self, id: i64, response: &serde_json::Value) -> Result<()> {
        let response_json = serde_json::to_string(response)?;
        sqlx::query(
            r#"
            UPDATE trades
            SET order_status_response = ?,
                binance_response = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&response_json)
        .bind(&response_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A failed status probe increments the error counter and records the
    /// issue; it never transitions the trade.
    pub async fn record_probe_failure(&self, id: i64, issue: &str) -> Result<()> {
        let Some(trade) = self.get_trade(id).await? else {
            return Err(anyhow!("trade {id} not found"));
        };
        let mut issues = trade.sync_issues;
        issues.push(issue.to_string());
        sqlx::query(
            r#"
            UPDATE trades
            SET sync_error_count = sync_error_count + 1,
                sync_issues = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&issues)?)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a sync issue, optionally flagging the row for manual
    /// verification. Does not touch `sync_error_count`.
    pub async fn flag_sync_issue(
        &self,
        id: i64,
        issue: &str,
        needs_verification: bool,
    ) -> Result<()> {
        let Some(trade) = self.get_trade(id).await? else {
            return Err(anyhow!("trade {id} not found"));
        };
        let mut issues = trade.sync_issues;
        issues.push(issue.to_string());
        sqlx::query(
            r#"
            UPDATE trades
            SET sync_issues = ?,
                manual_verification_needed = CASE WHEN ? THEN 1 ELSE manual_verification_needed END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&issues)?)
        .bind(needs_verification)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write-once `created_at`. Returns true when this call set it.
    pub async fn set_created_at_if_null(&self, id: i64, at_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trades SET created_at = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND created_at IS NULL",
        )
        .bind(at_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Close a trade: terminal CLOSED status, write-once `closed_at`,
    /// exit price and PnL. A `closed_at` earlier than `created_at` is an
    /// invariant violation: the write is refused and the row flagged.
    pub async fn close_trade(
        &self,
        id: i64,
        exit_price: Option<f64>,
        pnl_usd: Option<f64>,
        closed_at_ms: i64,
    ) -> Result<bool> {
        let Some(trade) = self.get_trade(id).await? else {
            return Err(anyhow!("trade {id} not found"));
        };
        if let Some(created) = trade.created_at {
            if closed_at_ms < created {
                self.flag_sync_issue(
                    id,
                    &format!("closed_at {closed_at_ms} precedes created_at {created}"),
                    true,
                )
                .await?;
                return Ok(false);
            }
        }
        if !trade.status.can_transition_to(TradeStatus::Closed) {
            self.flag_sync_issue(
                id,
                &format!("refused close from {}", trade.status.as_str()),
                true,
            )
            .await?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            UPDATE trades
            SET status = 'CLOSED',
                closed_at = CASE WHEN closed_at IS NULL THEN ? ELSE closed_at END,
                exit_price = COALESCE(?, exit_price),
                pnl_usd = COALESCE(?, pnl_usd),
                position_size = 0,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(closed_at_ms)
        .bind(exit_price)
        .bind(pnl_usd)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    /// Entry-fill update from an execution report.
    pub async fn record_entry_fill(
        &self,
        id: i64,
        entry_price: f64,
        position_size: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET binance_entry_price = ?,
                entry_price = COALESCE(entry_price, ?),
                position_size = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(entry_price)
        .bind(entry_price)
        .bind(position_size)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remaining size after a partial close.
    pub async fn record_partial_close(&self, id: i64, remaining_size: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET status = 'PARTIALLY_CLOSED',
                position_size = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status IN ('OPEN', 'PARTIALLY_CLOSED')
            "#,
        )
        .bind(remaining_size)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Backfill PnL/exit price on an already-closed trade. Never touches
    /// the lifecycle timestamps.
    pub async fn backfill_pnl(
        &self,
        id: i64,
        pnl_usd: Option<f64>,
        exit_price: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET pnl_usd = COALESCE(?, pnl_usd),
                exit_price = COALESCE(?, exit_price),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(pnl_usd)
        .bind(exit_price)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_tp_sl_orders(&self, id: i64, orders: &[ProtectiveOrder]) -> Result<()> {
        sqlx::query(
            "UPDATE trades SET tp_sl_orders = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(serde_json::to_string(orders)?)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fold a secondary trade into a primary after a same-side merge.
    pub async fn mark_merged(
        &self,
        secondary_id: i64,
        primary_id: i64,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET merged_into_trade_id = ?,
                merge_reason = ?,
                merged_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(primary_id)
        .bind(reason)
        .bind(secondary_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merge update on the surviving primary: new weighted entry and size.
    pub async fn record_merge_primary(
        &self,
        primary_id: i64,
        new_entry: f64,
        new_size: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET entry_price = ?, position_size = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(new_entry)
        .bind(new_size)
        .bind(primary_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Synthetic row from the active-futures audit: a venue position with
    /// no matching local trade.
    pub async fn insert_synthetic_trade(
        &self,
        coin_symbol: &str,
        parsed: &ParsedSignal,
        position_size: f64,
        entry_price: f64,
    ) -> Result<Trade> {
        let discord_id = format!("audit-{}", uuid::Uuid::new_v4());
        let now_ms = chrono::Utc::now().timestamp_millis();
        let parsed_json = serde_json::to_string(parsed)?;
        sqlx::query(
            r#"
            INSERT INTO trades (discord_id, timestamp, coin_symbol, parsed_signal,
                                signal_type, position_type, status, position_size,
                                entry_price, exchange_order_id, created_at,
                                manual_verification_needed)
            VALUES (?, ?, ?, ?, ?, ?, 'OPEN', ?, ?, 'audit-unmatched', ?, 1)
            "#,
        )
        .bind(&discord_id)
        .bind(now_ms)
        .bind(coin_symbol)
        .bind(&parsed_json)
        .bind(parsed.order_type.as_str())
        .bind(parsed.position_type.as_str())
        .bind(position_size)
        .bind(entry_price)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        self.get_trade_by_discord_id(&discord_id)
            .await?
            .ok_or_else(|| anyhow!("failed to retrieve synthetic trade"))
    }
}
