//! Income-event history, deduplicated on the natural key.

use anyhow::Result;
use sqlx::Row;

use super::Database;
use crate::models::TransactionRow;

impl Database {
    /// Insert an income event. Duplicate (time, type, amount, asset,
    /// symbol) tuples are ignored; returns true when a row was written.
    pub async fn insert_transaction(&self, tx: &TransactionRow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO transaction_history (time, type, amount, asset, symbol)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.time)
        .bind(&tx.tx_type)
        .bind(tx.amount)
        .bind(&tx.asset)
        .bind(&tx.symbol)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_transactions(&self, limit: i64) -> Result<Vec<TransactionRow>> {
        let rows = sqlx::query(
            "SELECT time, type, amount, asset, symbol FROM transaction_history
             ORDER BY time DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| TransactionRow {
                time: row.get("time"),
                tx_type: row.get("type"),
                amount: row.get("amount"),
                asset: row.get("asset"),
                symbol: row.get("symbol"),
            })
            .collect())
    }
}
