use tracing::{info, warn};

use common::{Error, Position, Result, Side};

use crate::indicators::EmaSnapshot;

/// Where the strategy stands for its symbol.
///
/// A pending signal only exists while awaiting a pullback and a held
/// position only while in position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EngineState {
    #[default]
    Flat,
    AwaitingPullback { signal: Side },
    InPosition(Position),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Flat,
    AwaitingPullback,
    InPosition,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Flat => write!(f, "flat"),
            Phase::AwaitingPullback => write!(f, "awaiting_pullback"),
            Phase::InPosition => write!(f, "in_position"),
        }
    }
}

impl EngineState {
    pub fn phase(&self) -> Phase {
        match self {
            EngineState::Flat => Phase::Flat,
            EngineState::AwaitingPullback { .. } => Phase::AwaitingPullback,
            EngineState::InPosition(_) => Phase::InPosition,
        }
    }

    pub fn pending_signal(&self) -> Option<Side> {
        match self {
            EngineState::AwaitingPullback { signal } => Some(*signal),
            _ => None,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            EngineState::InPosition(position) => Some(position),
            _ => None,
        }
    }
}

/// What the engine should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    /// Crossover seen but price too far from the slow EMA.
    AwaitPullback(Side),
    /// The pending signal no longer matches the averages.
    CancelPending(Side),
    Open(Side),
    /// Close the held side, then open the opposite one.
    Flip { from: Side, to: Side },
}

/// Effect of syncing local state with the exchange's position snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Unchanged,
    /// An external position was found while not in position.
    Adopted,
    /// The held position's side, size or entry changed externally.
    Refreshed,
    /// The exchange reports flat while a position was held.
    Cleared,
}

/// `|price - ema| / ema * 100 <= max_pct`. Never near a zero average.
pub fn is_near_ema(price: f64, ema: f64, max_pct: f64) -> bool {
    if ema == 0.0 {
        return false;
    }
    ((price - ema).abs() / ema) * 100.0 <= max_pct
}

/// Crossover + pullback state machine for a single symbol.
#[derive(Debug, Clone)]
pub struct PositionStateMachine {
    state: EngineState,
    max_pullback_pct: f64,
}

impl PositionStateMachine {
    pub fn new(max_pullback_pct: f64) -> Self {
        Self { state: EngineState::Flat, max_pullback_pct }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Evaluate the transition table. Pure: state changes are applied by the
    /// caller once the corresponding action has succeeded.
    pub fn decide(&self, price: f64, ema: &EmaSnapshot) -> Decision {
        let near = is_near_ema(price, ema.slow_last, self.max_pullback_pct);

        match self.state {
            EngineState::Flat => match ema.crossover() {
                Some(side) if near => Decision::Open(side),
                Some(side) => Decision::AwaitPullback(side),
                None => Decision::Hold,
            },
            EngineState::AwaitingPullback { signal } => {
                if ema.favoured_side() != Some(signal) {
                    Decision::CancelPending(signal)
                } else if near {
                    Decision::Open(signal)
                } else {
                    Decision::Hold
                }
            }
            EngineState::InPosition(position) => {
                if ema.favoured_side() == Some(position.side.opposite()) {
                    Decision::Flip { from: position.side, to: position.side.opposite() }
                } else {
                    Decision::Hold
                }
            }
        }
    }

    pub fn await_pullback(&mut self, signal: Side) {
        self.state = EngineState::AwaitingPullback { signal };
    }

    pub fn enter(&mut self, position: Position) {
        self.state = EngineState::InPosition(position);
    }

    pub fn reset(&mut self) {
        self.state = EngineState::Flat;
    }

    /// Sync with the exchange's authoritative position snapshot.
    pub fn reconcile(&mut self, external: Option<Position>) -> Result<Reconciliation> {
        let outcome = match (self.state, external) {
            (_, Some(ext)) if !ext.is_well_formed() => {
                return Err(Error::InvariantViolation(format!(
                    "exchange reported a malformed position: {ext:?}"
                )));
            }
            (EngineState::InPosition(held), Some(ext)) if held == ext => Reconciliation::Unchanged,
            (EngineState::InPosition(held), Some(ext)) => {
                info!(held = ?held, external = ?ext, "Position changed on the exchange");
                self.state = EngineState::InPosition(ext);
                Reconciliation::Refreshed
            }
            (EngineState::AwaitingPullback { signal }, Some(ext)) => {
                warn!(pending = %signal, side = %ext.side, "External position found while awaiting pullback, adopting it");
                self.state = EngineState::InPosition(ext);
                Reconciliation::Adopted
            }
            (EngineState::Flat, Some(ext)) => {
                info!(side = %ext.side, qty = ext.quantity, entry = ext.entry_price, "Adopting existing exchange position");
                self.state = EngineState::InPosition(ext);
                Reconciliation::Adopted
            }
            (EngineState::InPosition(held), None) => {
                info!(side = %held.side, "Exchange reports no position, reverting to flat");
                self.state = EngineState::Flat;
                Reconciliation::Cleared
            }
            (_, None) => Reconciliation::Unchanged,
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::ema_series;

    fn snapshot(prices: &[f64], fast: usize, slow: usize) -> EmaSnapshot {
        EmaSnapshot::from_series(&ema_series(prices, fast), &ema_series(prices, slow)).unwrap()
    }

    /// Slow decline, then a jump to 110: fast EMA crosses above slow.
    fn breakout_prices() -> Vec<f64> {
        let mut prices: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.1).collect();
        prices.push(110.0);
        prices
    }

    fn long(entry: f64) -> Position {
        Position { side: Side::Long, quantity: 1.0, entry_price: entry }
    }

    #[test]
    fn near_ema_uses_percent_distance() {
        assert!(is_near_ema(103.0, 100.0, 3.0));
        assert!(is_near_ema(97.0, 100.0, 3.0));
        assert!(!is_near_ema(103.5, 100.0, 3.0));
        assert!(!is_near_ema(0.0, 0.0, 3.0));
    }

    #[test]
    fn distant_crossover_waits_for_pullback() {
        let prices = breakout_prices();
        let snap = snapshot(&prices, 3, 6);
        assert_eq!(snap.crossover(), Some(Side::Long));

        let machine = PositionStateMachine::new(3.0);
        assert!(!is_near_ema(110.0, snap.slow_last, 3.0));
        assert_eq!(machine.decide(110.0, &snap), Decision::AwaitPullback(Side::Long));
    }

    #[test]
    fn nearby_crossover_opens_immediately() {
        let prices = breakout_prices();
        let snap = snapshot(&prices, 3, 6);
        // A wide pullback band makes the breakout price "near".
        let machine = PositionStateMachine::new(10.0);
        assert_eq!(machine.decide(110.0, &snap), Decision::Open(Side::Long));
    }

    #[test]
    fn flat_without_crossover_holds() {
        let snap = snapshot(&[100.0; 30], 3, 6);
        let machine = PositionStateMachine::new(3.0);
        assert_eq!(machine.decide(100.0, &snap), Decision::Hold);
    }

    #[test]
    fn pullback_near_slow_ema_opens_pending_side() {
        let mut machine = PositionStateMachine::new(3.0);
        machine.await_pullback(Side::Long);

        let snap = EmaSnapshot { fast_prev: 104.0, fast_last: 105.0, slow_prev: 102.0, slow_last: 103.0 };
        assert_eq!(machine.decide(104.0, &snap), Decision::Open(Side::Long));
        assert_eq!(machine.decide(110.0, &snap), Decision::Hold);
    }

    #[test]
    fn pending_signal_invalidated_when_averages_flip() {
        let mut machine = PositionStateMachine::new(3.0);
        machine.await_pullback(Side::Long);

        let snap = EmaSnapshot { fast_prev: 104.0, fast_last: 101.0, slow_prev: 102.0, slow_last: 102.0 };
        assert_eq!(machine.decide(101.5, &snap), Decision::CancelPending(Side::Long));
    }

    #[test]
    fn reversal_against_held_side_flips() {
        let mut machine = PositionStateMachine::new(3.0);
        machine.enter(long(100.0));

        let reversed = EmaSnapshot { fast_prev: 101.0, fast_last: 99.0, slow_prev: 100.0, slow_last: 100.0 };
        assert_eq!(
            machine.decide(99.0, &reversed),
            Decision::Flip { from: Side::Long, to: Side::Short }
        );

        let trending = EmaSnapshot { fast_prev: 101.0, fast_last: 102.0, slow_prev: 100.0, slow_last: 100.5 };
        assert_eq!(machine.decide(102.0, &trending), Decision::Hold);
    }

    #[test]
    fn reconcile_adopts_and_clears() {
        let mut machine = PositionStateMachine::new(3.0);

        assert_eq!(machine.reconcile(Some(long(100.0))).unwrap(), Reconciliation::Adopted);
        assert_eq!(machine.state().phase(), Phase::InPosition);

        assert_eq!(machine.reconcile(None).unwrap(), Reconciliation::Cleared);
        assert_eq!(*machine.state(), EngineState::Flat);
        assert_eq!(machine.reconcile(None).unwrap(), Reconciliation::Unchanged);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut machine = PositionStateMachine::new(3.0);
        machine.reconcile(Some(long(100.0))).unwrap();
        let first = *machine.state();

        assert_eq!(machine.reconcile(Some(long(100.0))).unwrap(), Reconciliation::Unchanged);
        assert_eq!(*machine.state(), first);
    }

    #[test]
    fn reconcile_refreshes_changed_position() {
        let mut machine = PositionStateMachine::new(3.0);
        machine.enter(long(100.0));
        let short = Position { side: Side::Short, quantity: 2.0, entry_price: 95.0 };

        assert_eq!(machine.reconcile(Some(short)).unwrap(), Reconciliation::Refreshed);
        assert_eq!(machine.state().position(), Some(&short));
    }

    #[test]
    fn reconcile_drops_pending_signal_for_external_position() {
        let mut machine = PositionStateMachine::new(3.0);
        machine.await_pullback(Side::Short);

        assert_eq!(machine.reconcile(Some(long(100.0))).unwrap(), Reconciliation::Adopted);
        assert_eq!(machine.state().pending_signal(), None);
        assert_eq!(machine.state().position().map(|p| p.side), Some(Side::Long));
    }

    #[test]
    fn reconcile_rejects_malformed_snapshot() {
        let mut machine = PositionStateMachine::new(3.0);
        machine.await_pullback(Side::Long);
        let bogus = Position { side: Side::Long, quantity: 0.0, entry_price: 100.0 };

        assert!(matches!(machine.reconcile(Some(bogus)), Err(Error::InvariantViolation(_))));
        assert_eq!(machine.state().pending_signal(), Some(Side::Long));
    }
}
