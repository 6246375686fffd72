//! Balance upserts, keyed by platform × account type × asset.

use anyhow::Result;
use sqlx::Row;

use super::Database;
use crate::models::BalanceRow;

impl Database {
    pub async fn upsert_balance(
        &self,
        platform: &str,
        account_type: &str,
        asset: &str,
        free: f64,
        locked: f64,
        total: f64,
        unrealized_pnl: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (platform, account_type, asset, free, locked, total,
                                  unrealized_pnl, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (platform, account_type, asset) DO UPDATE SET
                free = excluded.free,
                locked = excluded.locked,
                total = excluded.total,
                unrealized_pnl = excluded.unrealized_pnl,
                last_updated = CURRENT_TIMESTAMP
            "#,
        )
        .bind(platform)
        .bind(account_type)
        .bind(asset)
        .bind(free)
        .bind(locked)
        .bind(total)
        .bind(unrealized_pnl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_balances(&self) -> Result<Vec<BalanceRow>> {
        let rows = sqlx::query("SELECT * FROM balances ORDER BY platform, asset")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| BalanceRow {
                platform: row.get("platform"),
                account_type: row.get("account_type"),
                asset: row.get("asset"),
                free: row.get("free"),
                locked: row.get("locked"),
                total: row.get("total"),
                unrealized_pnl: row.get("unrealized_pnl"),
                last_updated: row.get("last_updated"),
            })
            .collect())
    }
}
