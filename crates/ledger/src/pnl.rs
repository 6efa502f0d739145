use common::Side;

/// Realized profit of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pnl {
    pub usdt: f64,
    /// Return on the initial margin, in percent.
    pub percent: f64,
}

/// `usdt = (exit - entry) * qty`, sign-inverted for shorts.
/// `percent = usdt / (entry * qty / leverage) * 100`, or 0 without margin.
pub fn realized_pnl(side: Side, entry_price: f64, exit_price: f64, quantity: f64, leverage: u32) -> Pnl {
    let direction = match side {
        Side::Long => 1.0,
        Side::Short => -1.0,
    };
    let usdt = (exit_price - entry_price) * quantity * direction;

    let margin = (entry_price * quantity) / f64::from(leverage.max(1));
    let percent = if margin > 0.0 { usdt / margin * 100.0 } else { 0.0 };

    Pnl { usdt, percent }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    #[test]
    fn long_profit_on_margin() {
        let pnl = realized_pnl(Side::Long, 100.0, 110.0, 2.0, 5);
        assert_close(pnl.usdt, 20.0);
        assert_close(pnl.percent, 50.0);
    }

    #[test]
    fn short_profit_when_price_falls() {
        let pnl = realized_pnl(Side::Short, 100.0, 90.0, 2.0, 5);
        assert_close(pnl.usdt, 20.0);
        assert_close(pnl.percent, 50.0);
    }

    #[test]
    fn short_loss_when_price_rises() {
        let pnl = realized_pnl(Side::Short, 100.0, 110.0, 2.0, 5);
        assert_close(pnl.usdt, -20.0);
        assert_close(pnl.percent, -50.0);
    }

    #[test]
    fn zero_margin_reports_zero_percent() {
        let pnl = realized_pnl(Side::Long, 0.0, 10.0, 2.0, 5);
        assert_close(pnl.usdt, 20.0);
        assert_close(pnl.percent, 0.0);
    }
}
