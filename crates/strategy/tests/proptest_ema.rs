use proptest::prelude::*;
use strategy::{ema_series, is_near_ema, EmaSnapshot, PositionStateMachine};

proptest! {
    /// The EMA of a constant series is that constant, whatever the period.
    #[test]
    fn ema_of_constant_series_converges(
        value in 0.0001f64..1_000_000.0f64,
        period in 1usize..50,
        extra in 0usize..100,
    ) {
        let prices = vec![value; period + extra];
        let ema = ema_series(&prices, period);
        prop_assert_eq!(ema.len(), extra + 1);
        for v in ema {
            prop_assert!((v - value).abs() <= value * 1e-9);
        }
    }

    /// Output length is `len - period + 1`, or empty when data is short.
    #[test]
    fn ema_length_tracks_input(
        prices in prop::collection::vec(1.0f64..10_000.0, 0..120),
        period in 1usize..60,
    ) {
        let ema = ema_series(&prices, period);
        if prices.len() < period {
            prop_assert!(ema.is_empty());
        } else {
            prop_assert_eq!(ema.len(), prices.len() - period + 1);
        }
    }

    /// Every EMA value stays within the range of the input prices.
    #[test]
    fn ema_stays_within_price_range(
        prices in prop::collection::vec(1.0f64..10_000.0, 1..120),
        period in 1usize..30,
    ) {
        let lo = prices.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        for v in ema_series(&prices, period) {
            prop_assert!(v >= lo - 1e-6 && v <= hi + 1e-6);
        }
    }

    /// Decisions on arbitrary averages never panic, and a zero slow EMA is never "near".
    #[test]
    fn decide_never_panics(
        fast_prev in -1_000.0f64..1_000.0,
        fast_last in -1_000.0f64..1_000.0,
        slow_prev in -1_000.0f64..1_000.0,
        slow_last in -1_000.0f64..1_000.0,
        price in 0.0f64..1_000.0,
    ) {
        let snap = EmaSnapshot { fast_prev, fast_last, slow_prev, slow_last };
        let machine = PositionStateMachine::new(3.0);
        let _ = machine.decide(price, &snap);
        prop_assert!(!is_near_ema(price, 0.0, 3.0));
    }
}
