use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use common::{Error, Result, Side, Trade};

use crate::store::TradeStore;

/// SQLite-backed trade store. The `idx_trades_one_open` partial unique index
/// backs the single-open-trade invariant at the storage level.
#[derive(Debug, Clone)]
pub struct SqliteTradeStore {
    db: SqlitePool,
}

impl SqliteTradeStore {
    /// Connect and apply migrations from `migrations/`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| Error::Config(format!("database migration failed: {e}")))?;
        info!("Trade store ready");

        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn insert(&self, trade: &Trade) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (id, user_id, symbol, side, entry_price, quantity, entry_timestamp,
                                exit_price, exit_timestamp, pnl_usdt, pnl_percent, is_open)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.user)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.entry_price)
        .bind(trade.quantity)
        .bind(trade.entry_timestamp.to_rfc3339())
        .bind(trade.exit_price)
        .bind(trade.exit_timestamp.map(|t| t.to_rfc3339()))
        .bind(trade.pnl_usdt)
        .bind(trade.pnl_percent)
        .bind(trade.is_open)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::InvariantViolation(format!(
                    "open trade already exists for {}/{}",
                    trade.user, trade.symbol
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, trade: &Trade) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET exit_price = ?1, exit_timestamp = ?2, pnl_usdt = ?3, pnl_percent = ?4, is_open = ?5
            WHERE id = ?6
            "#,
        )
        .bind(trade.exit_price)
        .bind(trade.exit_timestamp.map(|t| t.to_rfc3339()))
        .bind(trade.pnl_usdt)
        .bind(trade.pnl_percent)
        .bind(trade.is_open)
        .bind(&trade.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::InvariantViolation(format!("unknown trade {}", trade.id)));
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(row_to_trade).transpose()
    }

    async fn find_open(&self, user: &str, symbol: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE user_id = ?1 AND symbol = ?2 AND is_open = 1")
            .bind(user)
            .bind(symbol)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(row_to_trade).transpose()
    }

    async fn history(&self, user: &str, symbol: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE user_id = ?1 AND symbol = ?2 ORDER BY entry_timestamp DESC",
        )
        .bind(user)
        .bind(symbol)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(row_to_trade).collect()
    }
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade> {
    let side: String = row.try_get("side")?;
    let side = Side::from_str(&side).map_err(Error::InvariantViolation)?;
    let entry_timestamp: String = row.try_get("entry_timestamp")?;
    let exit_timestamp: Option<String> = row.try_get("exit_timestamp")?;

    Ok(Trade {
        id: row.try_get("id")?,
        user: row.try_get("user_id")?,
        symbol: row.try_get("symbol")?,
        side,
        entry_price: row.try_get("entry_price")?,
        quantity: row.try_get("quantity")?,
        entry_timestamp: parse_timestamp(&entry_timestamp)?,
        exit_price: row.try_get("exit_price")?,
        exit_timestamp: exit_timestamp.as_deref().map(parse_timestamp).transpose()?,
        pnl_usdt: row.try_get("pnl_usdt")?,
        pnl_percent: row.try_get("pnl_percent")?,
        is_open: row.try_get("is_open")?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvariantViolation(format!("bad timestamp '{raw}' in trades: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteTradeStore {
        SqliteTradeStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_find_open_round_trip() {
        let store = memory_store().await;
        let trade = Trade::open("alice", "BTCUSDT", Side::Short, 30_000.0, 0.01);
        store.insert(&trade).await.unwrap();

        let found = store.find_open("alice", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(found.id, trade.id);
        assert_eq!(found.side, Side::Short);
        assert!(found.is_open);
        assert!(store.find_open("bob", "BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unique_index_rejects_second_open_trade() {
        let store = memory_store().await;
        store.insert(&Trade::open("alice", "BTCUSDT", Side::Long, 100.0, 1.0)).await.unwrap();

        let second = Trade::open("alice", "BTCUSDT", Side::Short, 101.0, 1.0);
        let err = store.insert(&second).await.unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)), "got {err:?}");

        // Other symbols are unaffected.
        store.insert(&Trade::open("alice", "ETHUSDT", Side::Long, 10.0, 1.0)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_trade_is_persisted_and_frees_the_slot() {
        let store = memory_store().await;
        let mut trade = Trade::open("alice", "BTCUSDT", Side::Long, 100.0, 2.0);
        store.insert(&trade).await.unwrap();

        trade.exit_price = Some(110.0);
        trade.exit_timestamp = Some(Utc::now());
        trade.pnl_usdt = Some(20.0);
        trade.pnl_percent = Some(50.0);
        trade.is_open = false;
        store.update(&trade).await.unwrap();

        let stored = store.find(&trade.id).await.unwrap().unwrap();
        assert_eq!(stored.pnl_usdt, Some(20.0));
        assert!(!stored.is_open);
        assert!(store.find_open("alice", "BTCUSDT").await.unwrap().is_none());

        store.insert(&Trade::open("alice", "BTCUSDT", Side::Short, 110.0, 2.0)).await.unwrap();
        assert_eq!(store.history("alice", "BTCUSDT").await.unwrap().len(), 2);
    }
}
