use common::Side;

/// Exponential Moving Average over a close-price series (oldest first).
///
/// Smoothing factor is `2 / (period + 1)`, seeded with the simple average of
/// the first `period` values. The result is aligned to the tail of `prices`
/// and is `period - 1` elements shorter. Returns an empty series when there
/// are fewer than `period` prices; callers treat that as "not enough data".
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(prices.len() - period + 1);
    out.push(seed);

    let mut ema = seed;
    for &price in &prices[period..] {
        ema = price * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

/// The previous and latest values of the fast and slow averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaSnapshot {
    pub fast_prev: f64,
    pub fast_last: f64,
    pub slow_prev: f64,
    pub slow_last: f64,
}

impl EmaSnapshot {
    /// Take the last two values of each series. `None` if either is too short.
    pub fn from_series(fast: &[f64], slow: &[f64]) -> Option<Self> {
        let [fast_prev, fast_last] = last_two(fast)?;
        let [slow_prev, slow_last] = last_two(slow)?;
        Some(Self { fast_prev, fast_last, slow_prev, slow_last })
    }

    /// Side signalled by a crossover between the two samples, if any.
    pub fn crossover(&self) -> Option<Side> {
        if self.fast_prev < self.slow_prev && self.fast_last > self.slow_last {
            Some(Side::Long)
        } else if self.fast_prev > self.slow_prev && self.fast_last < self.slow_last {
            Some(Side::Short)
        } else {
            None
        }
    }

    /// Side the latest averages favour. Equal averages favour neither.
    pub fn favoured_side(&self) -> Option<Side> {
        if self.fast_last > self.slow_last {
            Some(Side::Long)
        } else if self.fast_last < self.slow_last {
            Some(Side::Short)
        } else {
            None
        }
    }
}

fn last_two(series: &[f64]) -> Option<[f64; 2]> {
    match series {
        [.., prev, last] => Some([*prev, *last]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_returns_empty_when_insufficient_data() {
        assert!(ema_series(&[1.0, 2.0], 3).is_empty());
        assert!(ema_series(&[], 1).is_empty());
        assert!(ema_series(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn ema_is_aligned_to_the_tail() {
        let prices: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(ema_series(&prices, 4).len(), 7);
        assert_eq!(ema_series(&prices, 10).len(), 1);
    }

    #[test]
    fn ema_seed_is_simple_average() {
        let ema = ema_series(&[2.0, 4.0, 6.0, 8.0], 3);
        assert!((ema[0] - 4.0).abs() < 1e-12);
        // k = 0.5 → 8 * 0.5 + 4 * 0.5
        assert!((ema[1] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn ema_of_constant_series_stays_constant() {
        let ema = ema_series(&[42.5; 50], 12);
        assert!(ema.iter().all(|v| (v - 42.5).abs() < 1e-9));
    }

    #[test]
    fn crossover_requires_strict_change_of_order() {
        let up = EmaSnapshot { fast_prev: 99.0, fast_last: 101.0, slow_prev: 100.0, slow_last: 100.0 };
        assert_eq!(up.crossover(), Some(Side::Long));

        let down = EmaSnapshot { fast_prev: 101.0, fast_last: 99.0, slow_prev: 100.0, slow_last: 100.0 };
        assert_eq!(down.crossover(), Some(Side::Short));

        let touching = EmaSnapshot { fast_prev: 100.0, fast_last: 101.0, slow_prev: 100.0, slow_last: 100.0 };
        assert_eq!(touching.crossover(), None);
        assert_eq!(touching.favoured_side(), Some(Side::Long));
    }

    #[test]
    fn snapshot_needs_two_values_per_series() {
        assert!(EmaSnapshot::from_series(&[1.0], &[1.0, 2.0]).is_none());
        let snap = EmaSnapshot::from_series(&[1.0, 2.0, 3.0], &[4.0, 5.0]).unwrap();
        assert_eq!(snap.fast_prev, 2.0);
        assert_eq!(snap.slow_last, 5.0);
    }
}
