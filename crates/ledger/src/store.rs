use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::{Error, Result, Trade};

/// Persistence backend for trades.
///
/// `insert` must refuse a second open trade for the same (user, symbol)
/// atomically with an `Error::InvariantViolation`.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn insert(&self, trade: &Trade) -> Result<()>;

    /// Overwrite the exit fields of an existing trade.
    async fn update(&self, trade: &Trade) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<Trade>>;

    async fn find_open(&self, user: &str, symbol: &str) -> Result<Option<Trade>>;

    /// All trades for (user, symbol), newest first.
    async fn history(&self, user: &str, symbol: &str) -> Result<Vec<Trade>>;
}

/// In-process trade store for paper runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTradeStore {
    trades: Arc<RwLock<Vec<Trade>>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn insert(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.write().await;
        if trade.is_open
            && trades
                .iter()
                .any(|t| t.is_open && t.user == trade.user && t.symbol == trade.symbol)
        {
            return Err(Error::InvariantViolation(format!(
                "open trade already exists for {}/{}",
                trade.user, trade.symbol
            )));
        }
        trades.push(trade.clone());
        Ok(())
    }

    async fn update(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.write().await;
        match trades.iter_mut().find(|t| t.id == trade.id) {
            Some(existing) => {
                *existing = trade.clone();
                Ok(())
            }
            None => Err(Error::InvariantViolation(format!("unknown trade {}", trade.id))),
        }
    }

    async fn find(&self, id: &str) -> Result<Option<Trade>> {
        Ok(self.trades.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn find_open(&self, user: &str, symbol: &str) -> Result<Option<Trade>> {
        Ok(self
            .trades
            .read()
            .await
            .iter()
            .find(|t| t.is_open && t.user == user && t.symbol == symbol)
            .cloned())
    }

    async fn history(&self, user: &str, symbol: &str) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.user == user && t.symbol == symbol)
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.entry_timestamp.cmp(&a.entry_timestamp));
        Ok(trades)
    }
}
