//! SQLite persistence for restart recovery.
//!
//! Stores:
//! - Open positions with their protective order ids
//! - Closed trades (append-only), the source of performance statistics
//!
//! Money is stored as TEXT so decimals round-trip exactly.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{ClosedTrade, ExitReason, Position};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPosition {
    symbol: String,
    entry_price: String,
    stop_loss_price: String,
    take_profit_price: String,
    size: String,
    opened_at: String,
    entry_order_id: String,
    stop_order_id: String,
    limit_order_id: String,
}

impl TryFrom<StoredPosition> for Position {
    type Error = anyhow::Error;

    fn try_from(row: StoredPosition) -> Result<Self> {
        Ok(Position {
            entry_price: decimal(&row.entry_price)?,
            stop_loss_price: decimal(&row.stop_loss_price)?,
            take_profit_price: decimal(&row.take_profit_price)?,
            size: decimal(&row.size)?,
            opened_at: timestamp(&row.opened_at)?,
            symbol: row.symbol,
            entry_order_id: row.entry_order_id,
            stop_order_id: row.stop_order_id,
            limit_order_id: row.limit_order_id,
        })
    }
}

/// Stored closed trade record.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    symbol: String,
    entry_price: String,
    exit_price: String,
    size: String,
    pnl: String,
    exit_reason: String,
    closed_at: String,
}

impl TryFrom<StoredTrade> for ClosedTrade {
    type Error = anyhow::Error;

    fn try_from(row: StoredTrade) -> Result<Self> {
        Ok(ClosedTrade {
            entry_price: decimal(&row.entry_price)?,
            exit_price: decimal(&row.exit_price)?,
            size: decimal(&row.size)?,
            pnl: decimal(&row.pnl)?,
            timestamp: timestamp(&row.closed_at)?,
            exit_reason: ExitReason::from_str(&row.exit_reason)
                .map_err(|e| anyhow::anyhow!(e))?,
            symbol: row.symbol,
        })
    }
}

fn decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid decimal '{}'", value))
}

fn timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

impl Database {
    /// Connect and create tables if needed.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Each in-memory connection is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS open_positions (
                symbol TEXT PRIMARY KEY,
                entry_price TEXT NOT NULL,
                stop_loss_price TEXT NOT NULL,
                take_profit_price TEXT NOT NULL,
                size TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                entry_order_id TEXT NOT NULL,
                stop_order_id TEXT NOT NULL,
                limit_order_id TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS closed_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                size TEXT NOT NULL,
                pnl TEXT NOT NULL,
                exit_reason TEXT NOT NULL,
                closed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_closed_trades_symbol ON closed_trades(symbol)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Positions ====================

    /// Insert or replace the position for its symbol.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO open_positions (
                symbol, entry_price, stop_loss_price, take_profit_price, size,
                opened_at, entry_order_id, stop_order_id, limit_order_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                entry_price = excluded.entry_price,
                stop_loss_price = excluded.stop_loss_price,
                take_profit_price = excluded.take_profit_price,
                size = excluded.size,
                opened_at = excluded.opened_at,
                entry_order_id = excluded.entry_order_id,
                stop_order_id = excluded.stop_order_id,
                limit_order_id = excluded.limit_order_id,
                updated_at = datetime('now')
            "#,
        )
        .bind(&position.symbol)
        .bind(position.entry_price.to_string())
        .bind(position.stop_loss_price.to_string())
        .bind(position.take_profit_price.to_string())
        .bind(position.size.to_string())
        .bind(position.opened_at.to_rfc3339())
        .bind(&position.entry_order_id)
        .bind(&position.stop_order_id)
        .bind(&position.limit_order_id)
        .execute(&self.pool)
        .await
        .context("Failed to save position")?;

        Ok(())
    }

    pub async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            r#"
            SELECT symbol, entry_price, stop_loss_price, take_profit_price, size,
                   opened_at, entry_order_id, stop_order_id, limit_order_id
            FROM open_positions
            ORDER BY symbol
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")?;

        rows.into_iter().map(Position::try_from).collect()
    }

    /// Remove the open position and append its closing trade atomically.
    pub async fn close_position(&self, trade: &ClosedTrade) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM open_positions WHERE symbol = ?")
            .bind(&trade.symbol)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO closed_trades (symbol, entry_price, exit_price, size, pnl, exit_reason, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.size.to_string())
        .bind(trade.pnl.to_string())
        .bind(trade.exit_reason.as_str())
        .bind(trade.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("Failed to record closed trade")?;
        Ok(())
    }

    // ==================== Trades ====================

    /// Every closed trade, oldest first.
    pub async fn load_trades(&self) -> Result<Vec<ClosedTrade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            r#"
            SELECT symbol, entry_price, exit_price, size, pnl, exit_reason, closed_at
            FROM closed_trades
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;

        rows.into_iter().map(ClosedTrade::try_from).collect()
    }

    /// Most recent closed trades, newest first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<ClosedTrade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            r#"
            SELECT symbol, entry_price, exit_price, size, pnl, exit_reason, closed_at
            FROM closed_trades
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;

        rows.into_iter().map(ClosedTrade::try_from).collect()
    }
}
