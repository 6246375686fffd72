//! Alert row CRUD
//!
//! Every follow-up signal is retained, including ones that were skipped
//! or failed to execute; the outcome lands in `parsed_alert` /
//! `binance_response` on the same row.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::models::AlertRow;

fn alert_from_row(row: &SqliteRow) -> Result<AlertRow> {
    let parse_json = |name: &str| -> Result<Option<serde_json::Value>> {
        let raw: Option<String> = row.get(name);
        Ok(match raw {
            Some(s) if !s.is_empty() => Some(serde_json::from_str(&s)?),
            _ => None,
        })
    };
    Ok(AlertRow {
        id: row.get("id"),
        timestamp_ms: row.get("timestamp"),
        discord_id: row.get("discord_id"),
        trade: row.get("trade"),
        content: row.get("content"),
        trader: row.get("trader"),
        parsed_alert: parse_json("parsed_alert")?,
        binance_response: parse_json("binance_response")?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Database {
    pub async fn insert_alert(
        &self,
        timestamp_ms: i64,
        discord_id: Option<&str>,
        parent_discord_id: &str,
        content: &str,
        trader: Option<&str>,
    ) -> Result<AlertRow> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (timestamp, discord_id, trade, content, trader)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(timestamp_ms)
        .bind(discord_id)
        .bind(parent_discord_id)
        .bind(content)
        .bind(trader)
        .execute(&self.pool)
        .await?;

        self.get_alert(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow!("failed to retrieve inserted alert"))
    }

    pub async fn get_alert(&self, id: i64) -> Result<Option<AlertRow>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    pub async fn list_alerts(&self, limit: i64) -> Result<Vec<AlertRow>> {
        let rows = sqlx::query("SELECT * FROM alerts ORDER BY timestamp DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(alert_from_row).collect()
    }

    pub async fn alerts_for_trade(&self, parent_discord_id: &str) -> Result<Vec<AlertRow>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE trade = ? ORDER BY timestamp")
            .bind(parent_discord_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(alert_from_row).collect()
    }

    /// Record the classification outcome for an alert.
    pub async fn update_alert_parsed(
        &self,
        id: i64,
        parsed: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE alerts SET parsed_alert = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(parsed.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the venue outcome of executing an alert.
    pub async fn update_alert_response(
        &self,
        id: i64,
        response: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE alerts SET binance_response = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(response.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
