use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{error, info};

use common::{Error, Result, Trade};

use crate::pnl::realized_pnl;
use crate::store::TradeStore;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Trade history plus the "one open trade per (user, symbol)" rule.
///
/// Writes for the same (user, symbol) are serialised through a keyed async
/// lock, so engines of different users can share one ledger.
pub struct TradeLedger {
    store: Arc<dyn TradeStore>,
    locks: Mutex<HashMap<(String, String), KeyLock>>,
}

impl TradeLedger {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store, locks: Mutex::new(HashMap::new()) }
    }

    fn key_lock(&self, user: &str, symbol: &str) -> KeyLock {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry((user.to_string(), symbol.to_string()))
            .or_default()
            .clone()
    }

    /// Record a newly opened trade. A second open trade for the same
    /// (user, symbol) is an `InvariantViolation` and leaves the first untouched.
    pub async fn record_open(&self, trade: Trade) -> Result<Trade> {
        if !trade.is_open {
            return Err(Error::InvariantViolation(format!(
                "trade {} recorded as open but already closed",
                trade.id
            )));
        }

        let lock = self.key_lock(&trade.user, &trade.symbol);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.find_open(&trade.user, &trade.symbol).await? {
            error!(
                user = %trade.user,
                symbol = %trade.symbol,
                existing = %existing.id,
                "Refusing second open trade"
            );
            return Err(Error::InvariantViolation(format!(
                "open trade {} already exists for {}/{}",
                existing.id, trade.user, trade.symbol
            )));
        }

        self.store.insert(&trade).await?;
        info!(id = %trade.id, user = %trade.user, symbol = %trade.symbol, side = %trade.side, "Trade opened");
        Ok(trade)
    }

    /// Settle an open trade at `exit_price` and return it with its PnL filled in.
    pub async fn record_close(
        &self,
        trade_id: &str,
        exit_price: f64,
        closed_at: DateTime<Utc>,
        leverage: u32,
    ) -> Result<Trade> {
        let unknown = || Error::InvariantViolation(format!("unknown trade {trade_id}"));
        let located = self.store.find(trade_id).await?.ok_or_else(unknown)?;

        let lock = self.key_lock(&located.user, &located.symbol);
        let _guard = lock.lock().await;

        // Another close may have settled it while we waited for the lock.
        let mut trade = self.store.find(trade_id).await?.ok_or_else(unknown)?;
        if !trade.is_open {
            return Err(Error::InvariantViolation(format!("trade {trade_id} is already closed")));
        }

        let pnl = realized_pnl(trade.side, trade.entry_price, exit_price, trade.quantity, leverage);
        trade.exit_price = Some(exit_price);
        trade.exit_timestamp = Some(closed_at);
        trade.pnl_usdt = Some(pnl.usdt);
        trade.pnl_percent = Some(pnl.percent);
        trade.is_open = false;

        self.store.update(&trade).await?;
        info!(
            id = %trade.id,
            symbol = %trade.symbol,
            exit = exit_price,
            pnl_usdt = pnl.usdt,
            pnl_pct = pnl.percent,
            "Trade closed"
        );
        Ok(trade)
    }

    pub async fn find_open(&self, user: &str, symbol: &str) -> Result<Option<Trade>> {
        self.store.find_open(user, symbol).await
    }

    pub async fn history(&self, user: &str, symbol: &str) -> Result<Vec<Trade>> {
        self.store.history(user, symbol).await
    }
}
