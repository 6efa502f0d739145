use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    ExchangeGateway, GatewayError, GatewayResult, MarginMode, Order, OrderConfirmation, OrderSide, Position, Side,
};

/// Simulated futures account for paper trading.
///
/// Market data (candles, prices, precision) comes from a real read-only
/// gateway. Orders fill at the latest price with configurable slippage and
/// move a simulated one-way position per symbol. Nothing is ever sent to
/// the exchange's order endpoints.
pub struct PaperClient {
    market: Arc<dyn ExchangeGateway>,
    /// Net position per symbol.
    positions: Arc<RwLock<HashMap<String, Position>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(market: Arc<dyn ExchangeGateway>, slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperClient initialized");
        Self {
            market,
            positions: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
        }
    }

    /// Expose simulated positions (for tests and auditing).
    pub fn positions_handle(&self) -> Arc<RwLock<HashMap<String, Position>>> {
        self.positions.clone()
    }

    fn fill_price(&self, mid: f64, side: OrderSide) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

fn order_direction(side: OrderSide) -> Side {
    match side {
        OrderSide::Buy => Side::Long,
        OrderSide::Sell => Side::Short,
    }
}

/// Apply a fill to the net position. `None` means flat afterwards.
fn apply_fill(current: Option<Position>, side: Side, quantity: f64, price: f64) -> Option<Position> {
    match current {
        None => Some(Position { side, quantity, entry_price: price }),
        Some(held) if held.side == side => {
            let total = held.quantity + quantity;
            let entry_price = (held.entry_price * held.quantity + price * quantity) / total;
            Some(Position { side, quantity: total, entry_price })
        }
        Some(held) => {
            let remaining = held.quantity - quantity;
            if remaining > f64::EPSILON {
                Some(Position { quantity: remaining, ..held })
            } else if remaining < -f64::EPSILON {
                Some(Position { side, quantity: -remaining, entry_price: price })
            } else {
                None
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperClient {
    async fn candles(&self, symbol: &str, timeframe: &str, limit: usize) -> GatewayResult<Vec<f64>> {
        self.market.candles(symbol, timeframe, limit).await
    }

    async fn current_price(&self, symbol: &str) -> GatewayResult<f64> {
        self.market.current_price(symbol).await
    }

    async fn position(&self, symbol: &str) -> GatewayResult<Option<Position>> {
        Ok(self.positions.read().await.get(symbol).copied())
    }

    async fn quantity_precision(&self, symbol: &str) -> GatewayResult<u32> {
        self.market.quantity_precision(symbol).await
    }

    async fn place_market_order(&self, order: &Order) -> GatewayResult<OrderConfirmation> {
        if !order.quantity.is_finite() || order.quantity <= 0.0 {
            return Err(GatewayError::rejected(format!("invalid quantity {}", order.quantity)));
        }
        let mid = self.market.current_price(&order.symbol).await?;
        let fill_price = self.fill_price(mid, order.side);
        let direction = order_direction(order.side);

        let mut positions = self.positions.write().await;
        let current = positions.get(&order.symbol).copied();

        let quantity = if order.reduce_only {
            match current {
                Some(held) if held.side != direction => order.quantity.min(held.quantity),
                _ => {
                    return Err(GatewayError::rejected(format!(
                        "reduce-only {} order on {} would not reduce the position",
                        order.side, order.symbol
                    )))
                }
            }
        } else {
            order.quantity
        };

        match apply_fill(current, direction, quantity, fill_price) {
            Some(next) => positions.insert(order.symbol.clone(), next),
            None => positions.remove(&order.symbol),
        };

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            mid,
            fill = fill_price,
            qty = quantity,
            reduce_only = order.reduce_only,
            "Paper fill simulated"
        );

        Ok(OrderConfirmation {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        debug!(symbol, leverage, "Paper leverage set");
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> GatewayResult<()> {
        debug!(symbol, mode = %mode, "Paper margin mode set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Read-only market with a fixed price.
    struct FixedMarket(f64);

    #[async_trait]
    impl ExchangeGateway for FixedMarket {
        async fn candles(&self, _: &str, _: &str, _: usize) -> GatewayResult<Vec<f64>> {
            Ok(vec![self.0; 3])
        }
        async fn current_price(&self, _: &str) -> GatewayResult<f64> {
            Ok(self.0)
        }
        async fn position(&self, _: &str) -> GatewayResult<Option<Position>> {
            unreachable!("paper client tracks its own positions")
        }
        async fn quantity_precision(&self, _: &str) -> GatewayResult<u32> {
            Ok(3)
        }
        async fn place_market_order(&self, _: &Order) -> GatewayResult<OrderConfirmation> {
            unreachable!("paper client never forwards orders")
        }
        async fn set_leverage(&self, _: &str, _: u32) -> GatewayResult<()> {
            unreachable!()
        }
        async fn set_margin_mode(&self, _: &str, _: MarginMode) -> GatewayResult<()> {
            unreachable!()
        }
    }

    fn client(price: f64, slippage_bps: f64) -> PaperClient {
        PaperClient::new(Arc::new(FixedMarket(price)), slippage_bps)
    }

    #[tokio::test]
    async fn paper_buy_fill_applies_positive_slippage() {
        let client = client(1000.0, 10.0); // 10 bps
        client.place_market_order(&Order::market("BTCUSDT", OrderSide::Buy, 0.01)).await.unwrap();

        let held = client.position("BTCUSDT").await.unwrap().unwrap();
        let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
        assert!(
            (held.entry_price - expected).abs() < 1e-6,
            "Buy fill price {}, expected {}",
            held.entry_price,
            expected
        );
        assert_eq!(held.side, Side::Long);
    }

    #[tokio::test]
    async fn paper_sell_opens_short_with_negative_slippage() {
        let client = client(1000.0, 10.0);
        client.place_market_order(&Order::market("BTCUSDT", OrderSide::Sell, 0.01)).await.unwrap();

        let held = client.position("BTCUSDT").await.unwrap().unwrap();
        let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
        assert!((held.entry_price - expected).abs() < 1e-6);
        assert_eq!(held.side, Side::Short);
    }

    #[tokio::test]
    async fn reduce_only_close_flattens_the_position() {
        let client = client(500.0, 0.0);
        client.place_market_order(&Order::market("ETHUSDT", OrderSide::Buy, 1.0)).await.unwrap();

        let close = Order::reduce_only("ETHUSDT", OrderSide::Sell, 1.0);
        client.place_market_order(&close).await.unwrap();

        assert!(client.position("ETHUSDT").await.unwrap().is_none());
        assert!(client.positions_handle().read().await.is_empty());
    }

    #[tokio::test]
    async fn reduce_only_never_opens_or_grows() {
        let client = client(500.0, 0.0);
        let flat_close = Order::reduce_only("ETHUSDT", OrderSide::Sell, 1.0);
        assert!(client.place_market_order(&flat_close).await.is_err());
        assert!(client.position("ETHUSDT").await.unwrap().is_none());

        client.place_market_order(&Order::market("ETHUSDT", OrderSide::Buy, 1.0)).await.unwrap();
        let same_side = Order::reduce_only("ETHUSDT", OrderSide::Buy, 1.0);
        assert!(client.place_market_order(&same_side).await.is_err());

        // Oversized reduce-only is capped at the held quantity.
        let oversized = Order::reduce_only("ETHUSDT", OrderSide::Sell, 5.0);
        let confirmation = client.place_market_order(&oversized).await.unwrap();
        assert_eq!(confirmation.quantity, 1.0);
        assert!(client.position("ETHUSDT").await.unwrap().is_none());
    }

    #[test]
    fn adding_to_a_position_averages_the_entry() {
        let first = apply_fill(None, Side::Long, 1.0, 100.0);
        let second = apply_fill(first, Side::Long, 1.0, 110.0).unwrap();
        assert_eq!(second.quantity, 2.0);
        assert!((second.entry_price - 105.0).abs() < 1e-9);

        let flipped = apply_fill(Some(second), Side::Short, 3.0, 120.0).unwrap();
        assert_eq!(flipped.side, Side::Short);
        assert!((flipped.quantity - 1.0).abs() < 1e-9);
        assert_eq!(flipped.entry_price, 120.0);
    }
}
