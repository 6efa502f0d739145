use async_trait::async_trait;

use crate::{GatewayResult, MarginMode, Order, OrderConfirmation, Position};

/// Abstraction over a futures exchange connection.
///
/// `BinanceFuturesClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Every method reports failures as a `GatewayError` whose `kind` tells the
/// engine whether to retry, surface a rejection, or stop the bot.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Closing prices of the most recent candles, oldest first.
    async fn candles(&self, symbol: &str, timeframe: &str, limit: usize) -> GatewayResult<Vec<f64>>;

    /// Latest traded price for a symbol.
    async fn current_price(&self, symbol: &str) -> GatewayResult<f64>;

    /// Open position on the symbol, `None` when flat.
    async fn position(&self, symbol: &str) -> GatewayResult<Option<Position>>;

    /// Number of decimals the exchange accepts for order quantities.
    async fn quantity_precision(&self, symbol: &str) -> GatewayResult<u32>;

    /// Submit a market order and return the exchange acknowledgement.
    async fn place_market_order(&self, order: &Order) -> GatewayResult<OrderConfirmation>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()>;

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> GatewayResult<()>;
}
