//! Database module - schema initialization and table management
//!
//! One `Database` struct over a SQLite pool, with CRUD operations split
//! into per-table submodules. Write-once columns (`created_at`,
//! `closed_at`, `original_order_response`) are guarded with
//! compare-and-swap against NULL at the SQL level so no caller can
//! overwrite them, regardless of interleaving.

use anyhow::Result;
use sqlx::sqlite::SqlitePool;

mod alerts;
mod balances;
mod trades;
mod transactions;

#[cfg(test)]
mod tests;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                discord_id TEXT NOT NULL UNIQUE,
                timestamp INTEGER NOT NULL,
                coin_symbol TEXT NOT NULL,
                trader TEXT,
                parsed_signal TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                position_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                entry_price REAL,
                binance_entry_price REAL,
                exit_price REAL,
                position_size REAL,
                exchange_order_id TEXT,
                original_order_response TEXT,
                binance_response TEXT,
                order_status_response TEXT,
                tp_sl_orders TEXT NOT NULL DEFAULT '[]',
                pnl_usd REAL,
                sync_error_count INTEGER NOT NULL DEFAULT 0,
                sync_issues TEXT NOT NULL DEFAULT '[]',
                manual_verification_needed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER,
                closed_at INTEGER,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                merged_into_trade_id INTEGER,
                merge_reason TEXT,
                merged_at DATETIME
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                discord_id TEXT,
                trade TEXT NOT NULL,
                content TEXT NOT NULL,
                trader TEXT,
                parsed_alert TEXT,
                binance_response TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balances (
                platform TEXT NOT NULL,
                account_type TEXT NOT NULL,
                asset TEXT NOT NULL,
                free REAL NOT NULL DEFAULT 0,
                locked REAL NOT NULL DEFAULT 0,
                total REAL NOT NULL DEFAULT 0,
                unrealized_pnl REAL NOT NULL DEFAULT 0,
                last_updated DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (platform, account_type, asset)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transaction_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time INTEGER NOT NULL,
                type TEXT NOT NULL,
                amount REAL NOT NULL,
                asset TEXT NOT NULL,
                symbol TEXT NOT NULL DEFAULT '',
                UNIQUE (time, type, amount, asset, symbol)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        // Indexes for the hot lookups: timestamp binding, order-id
        // resolution from stream events, and live-trade scans.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp)")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trades_order_id ON trades(exchange_order_id)",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol_status ON trades(coin_symbol, status)",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_trade ON alerts(trade)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}
