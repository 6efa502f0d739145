use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use common::{Error, ExchangeGateway, Notifier, Order, Position, Result, Side, Trade};
use ledger::TradeLedger;
use strategy::StrategyConfig;

use crate::timing::bounded;

/// Used when the exchange cannot tell us the symbol's quantity precision.
pub const DEFAULT_QUANTITY_PRECISION: u32 = 3;

/// Round a quantity to `precision` decimals.
pub fn round_quantity(quantity: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(16) as i32);
    (quantity * factor).round() / factor
}

/// Turns open/close decisions into exchange orders and ledger records.
///
/// This is the ONLY component that calls `ExchangeGateway::place_market_order`.
pub struct OrderExecutor {
    user: String,
    symbol: String,
    quantity_usdt: f64,
    leverage: u32,
    gateway: Arc<dyn ExchangeGateway>,
    ledger: Arc<TradeLedger>,
    notifier: Arc<dyn Notifier>,
    gateway_timeout: Duration,
    precision: Option<u32>,
}

impl OrderExecutor {
    pub fn new(
        user: impl Into<String>,
        config: &StrategyConfig,
        gateway: Arc<dyn ExchangeGateway>,
        ledger: Arc<TradeLedger>,
        notifier: Arc<dyn Notifier>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            user: user.into(),
            symbol: config.symbol.clone(),
            quantity_usdt: config.quantity_usdt,
            leverage: config.leverage,
            gateway,
            ledger,
            notifier,
            gateway_timeout,
            precision: None,
        }
    }

    /// Quantity precision, fetched once and cached. Lookup failures fall
    /// back to the default without caching so the next order retries.
    async fn precision(&mut self) -> u32 {
        if let Some(p) = self.precision {
            return p;
        }
        match bounded(
            self.gateway_timeout,
            "quantity_precision",
            self.gateway.quantity_precision(&self.symbol),
        )
        .await
        {
            Ok(p) => {
                self.precision = Some(p);
                p
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Precision lookup failed, using {DEFAULT_QUANTITY_PRECISION} decimals");
                DEFAULT_QUANTITY_PRECISION
            }
        }
    }

    async fn latest_price_or(&self, fallback: f64) -> f64 {
        match bounded(self.gateway_timeout, "current_price", self.gateway.current_price(&self.symbol)).await {
            Ok(price) if price.is_finite() && price > 0.0 => price,
            Ok(price) => {
                warn!(symbol = %self.symbol, price, fallback, "Exchange returned an unusable price");
                fallback
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, fallback, "Price re-query failed");
                fallback
            }
        }
    }

    /// Open a position sized `quantity_usdt * leverage / price` on `side`.
    pub async fn open_position(&mut self, side: Side, reference_price: f64) -> Result<Trade> {
        if let Some(existing) = self.ledger.find_open(&self.user, &self.symbol).await? {
            error!(
                user = %self.user,
                symbol = %self.symbol,
                trade = %existing.id,
                "Ledger still holds an open trade, refusing to open another"
            );
            return Err(Error::InvariantViolation(format!(
                "open trade {} already recorded for {}/{}",
                existing.id, self.user, self.symbol
            )));
        }
        if !reference_price.is_finite() || reference_price <= 0.0 {
            return Err(Error::OrderRejected(format!("invalid reference price {reference_price}")));
        }

        let precision = self.precision().await;
        let notional = self.quantity_usdt * f64::from(self.leverage);
        let quantity = round_quantity(notional / reference_price, precision);
        if quantity <= 0.0 {
            return Err(Error::OrderRejected(format!(
                "{notional} USDT at {reference_price} rounds to zero with {precision} decimals"
            )));
        }

        let order = Order::market(&self.symbol, side.entry_order_side(), quantity);
        info!(symbol = %self.symbol, side = %side, qty = quantity, "Opening position");
        let confirmation = bounded(
            self.gateway_timeout,
            "place_market_order",
            self.gateway.place_market_order(&order),
        )
        .await
        .map_err(|e| {
            error!(symbol = %self.symbol, side = %side, error = %e, "Open order failed");
            e
        })?;

        let entry_price = self.latest_price_or(reference_price).await;
        let trade = self
            .ledger
            .record_open(Trade::open(&self.user, &self.symbol, side, entry_price, quantity))
            .await?;
        info!(order_id = %confirmation.order_id, entry = entry_price, "Position opened");

        self.notifier
            .notify(&format!(
                "✅ Position opened\nSymbol: {}\nSide: {}\nQuantity: {quantity}\nEntry: {entry_price:.4}",
                self.symbol,
                side.as_str().to_uppercase()
            ))
            .await;
        Ok(trade)
    }

    /// Close the held position with a reduce-only market order.
    ///
    /// `Ok(false)` when nothing is held. An order failure is returned as an
    /// error and leaves the ledger untouched. Once the exchange has accepted
    /// the close this returns `Ok(true)` even if the ledger write fails; the
    /// open trade is then settled by the next reconcile against a flat
    /// exchange.
    pub async fn close_position(
        &mut self,
        held: Option<&Position>,
        reason: &str,
        fallback_price: f64,
    ) -> Result<bool> {
        let Some(held) = held else {
            return Ok(false);
        };

        let precision = self.precision().await;
        let quantity = round_quantity(held.quantity, precision);
        let order = Order::reduce_only(&self.symbol, held.side.exit_order_side(), quantity);
        info!(symbol = %self.symbol, side = %held.side, qty = quantity, reason, "Closing position");

        bounded(
            self.gateway_timeout,
            "place_market_order",
            self.gateway.place_market_order(&order),
        )
        .await
        .map_err(|e| {
            error!(symbol = %self.symbol, error = %e, "Close order failed");
            e
        })?;

        let mut message = format!("🚨 Position closed\nSymbol: {}\nReason: {reason}", self.symbol);
        match self.settle_trade(fallback_price).await {
            Ok(Some(trade)) => push_pnl(&mut message, &trade),
            Ok(None) => {}
            Err(e) => error!(
                user = %self.user,
                symbol = %self.symbol,
                error = %e,
                "Position closed on the exchange but the ledger write failed, trade left open until the next reconcile"
            ),
        }
        self.notifier.notify(&message).await;
        Ok(true)
    }

    /// Settle a ledger trade that is still open although the exchange
    /// reports flat: a position closed outside the bot, or a close whose
    /// ledger write failed. Exit is the latest price, or the entry price
    /// when no price is available.
    pub async fn settle_stale_trade(&self) -> Result<Option<Trade>> {
        let Some(open) = self.ledger.find_open(&self.user, &self.symbol).await? else {
            return Ok(None);
        };
        warn!(
            user = %self.user,
            symbol = %self.symbol,
            trade = %open.id,
            "Exchange is flat but the ledger holds an open trade, settling it"
        );
        let closed = self.record_exit(&open, open.entry_price).await?;

        let mut message = format!(
            "🚨 Position closed\nSymbol: {}\nReason: no longer open on the exchange",
            self.symbol
        );
        push_pnl(&mut message, &closed);
        self.notifier.notify(&message).await;
        Ok(Some(closed))
    }

    /// Record the exit of the ledger's open trade, if there is one.
    async fn settle_trade(&self, fallback_price: f64) -> Result<Option<Trade>> {
        let Some(open) = self.ledger.find_open(&self.user, &self.symbol).await? else {
            warn!(user = %self.user, symbol = %self.symbol, "Closed a position with no open trade in the ledger");
            return Ok(None);
        };
        self.record_exit(&open, fallback_price).await.map(Some)
    }

    async fn record_exit(&self, open: &Trade, fallback_price: f64) -> Result<Trade> {
        let exit_price = self.latest_price_or(fallback_price).await;
        self.ledger
            .record_close(&open.id, exit_price, Utc::now(), self.leverage)
            .await
    }
}

fn push_pnl(message: &mut String, trade: &Trade) {
    if let (Some(pnl), Some(pct)) = (trade.pnl_usdt, trade.pnl_percent) {
        message.push_str(&format!("\nPnL: {pnl:.2} USDT ({pct:.2}%)"));
    }
}
