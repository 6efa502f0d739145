use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use common::{Error, ErrorClass, ExchangeGateway, GatewayError, Notifier, Position, Result, Side};
use ledger::TradeLedger;
use strategy::{ema_series, Decision, EmaSnapshot, EngineState, PositionStateMachine, Reconciliation, StrategyConfig};

use crate::executor::OrderExecutor;
use crate::timing::{bounded, EngineTiming};

/// Shared stop flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `request` has been called.
    pub async fn requested(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// What a tick did on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    None,
    Opened,
    Closed,
    Flipped,
}

#[derive(Debug)]
pub struct TickOutcome {
    pub action: TickAction,
    pub error: Option<Error>,
}

impl TickOutcome {
    fn done(action: TickAction) -> Self {
        Self { action, error: None }
    }

    fn idle() -> Self {
        Self::done(TickAction::None)
    }

    fn failed(action: TickAction, error: Error) -> Self {
        Self { action, error: Some(error) }
    }

    pub fn is_fatal(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_fatal)
    }
}

/// One user's trading engine for one symbol.
///
/// Owns the position state machine and the order executor. `tick` is the
/// only entry point that moves state; it is called by the driver loop and
/// never runs concurrently with itself.
pub struct Engine {
    user: String,
    config: StrategyConfig,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    executor: OrderExecutor,
    machine: PositionStateMachine,
    timing: EngineTiming,
    stop: StopSignal,
}

impl Engine {
    /// Validate the configuration, prepare the symbol on the exchange and
    /// adopt whatever position is already open there.
    pub async fn new(
        user: impl Into<String>,
        config: StrategyConfig,
        gateway: Arc<dyn ExchangeGateway>,
        ledger: Arc<TradeLedger>,
        notifier: Arc<dyn Notifier>,
        timing: EngineTiming,
    ) -> Result<Self> {
        let user = user.into();
        config.validate()?;

        let executor = OrderExecutor::new(
            user.clone(),
            &config,
            gateway.clone(),
            ledger,
            notifier.clone(),
            timing.gateway_timeout,
        );
        let mut engine = Self {
            machine: PositionStateMachine::new(config.max_pullback_distance_percent),
            user,
            config,
            gateway,
            notifier,
            executor,
            timing,
            stop: StopSignal::new(),
        };

        engine.prepare_symbol().await;
        match engine.reconcile().await {
            Ok(Reconciliation::Adopted) => {
                if let Some(p) = engine.machine.state().position() {
                    info!(user = %engine.user, side = %p.side, qty = p.quantity, "Resuming with existing position");
                }
            }
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(user = %engine.user, error = %e, "Initial position check failed, starting flat"),
        }

        info!(
            user = %engine.user,
            symbol = %engine.config.symbol,
            timeframe = %engine.config.timeframe,
            fast = engine.config.ema_fast_period,
            slow = engine.config.ema_slow_period,
            "Engine ready"
        );
        Ok(engine)
    }

    /// Share a stop signal with other engines (e.g. one per process).
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ask the driver to stop after the current tick.
    pub fn request_stop(&self) {
        info!(user = %self.user, symbol = %self.config.symbol, "Stop requested");
        self.stop.request();
    }

    pub fn state(&self) -> &EngineState {
        self.machine.state()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    /// Leverage and margin mode are best effort: a failure is logged and
    /// the engine keeps going with whatever the account already has.
    async fn prepare_symbol(&self) {
        let symbol = &self.config.symbol;
        if let Err(e) = bounded(
            self.timing.gateway_timeout,
            "set_leverage",
            self.gateway.set_leverage(symbol, self.config.leverage),
        )
        .await
        {
            warn!(symbol = %symbol, leverage = self.config.leverage, error = %e, "Could not set leverage");
        }
        if let Err(e) = bounded(
            self.timing.gateway_timeout,
            "set_margin_mode",
            self.gateway.set_margin_mode(symbol, self.config.margin_mode),
        )
        .await
        {
            warn!(symbol = %symbol, mode = %self.config.margin_mode, error = %e, "Could not set margin mode");
        }
    }

    /// Bring the local state in line with the exchange. When the exchange
    /// is flat, any trade the ledger still holds open is settled.
    pub async fn reconcile(&mut self) -> Result<Reconciliation> {
        let external = self.exchange_position().await?;
        let outcome = self.machine.reconcile(external)?;
        if external.is_none() {
            self.executor.settle_stale_trade().await?;
        }
        Ok(outcome)
    }

    async fn exchange_position(&self) -> Result<Option<Position>> {
        bounded(
            self.timing.gateway_timeout,
            "position",
            self.gateway.position(&self.config.symbol),
        )
        .await
    }

    /// Re-read the position after an action. Only the state machine
    /// follows: the exchange may still lag behind a fresh fill, so the
    /// ledger is left for the next tick. A failure keeps the local view.
    async fn resync(&mut self) {
        let synced = match self.exchange_position().await {
            Ok(external) => self.machine.reconcile(external),
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            warn!(user = %self.user, error = %e, "Post-action reconcile failed");
        }
    }

    /// Run one evaluation cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.evaluate().await;
        if let Some(e) = &outcome.error {
            match e.class() {
                ErrorClass::Transient => warn!(user = %self.user, symbol = %self.config.symbol, error = %e, "Tick failed, retrying next interval"),
                ErrorClass::OrderRejected => error!(user = %self.user, symbol = %self.config.symbol, error = %e, "Order rejected"),
                ErrorClass::Configuration => error!(user = %self.user, symbol = %self.config.symbol, error = %e, "Configuration error"),
                ErrorClass::InvariantViolation => error!(user = %self.user, symbol = %self.config.symbol, error = %e, "INVARIANT VIOLATION"),
            }
        }
        outcome
    }

    async fn evaluate(&mut self) -> TickOutcome {
        if let Err(e) = self.reconcile().await {
            return TickOutcome::failed(TickAction::None, e);
        }

        let prices = match bounded(
            self.timing.gateway_timeout,
            "candles",
            self.gateway.candles(&self.config.symbol, &self.config.timeframe, self.config.history_limit()),
        )
        .await
        {
            Ok(prices) => prices,
            Err(e) => return TickOutcome::failed(TickAction::None, e),
        };

        let Some((price, ema)) = self.indicators(&prices) else {
            debug!(symbol = %self.config.symbol, candles = prices.len(), "Not enough history for the EMAs yet");
            return TickOutcome::idle();
        };
        debug!(
            symbol = %self.config.symbol,
            price,
            fast = ema.fast_last,
            slow = ema.slow_last,
            phase = %self.machine.state().phase(),
            "Tick"
        );

        match self.machine.decide(price, &ema) {
            Decision::Hold => TickOutcome::idle(),
            Decision::AwaitPullback(side) => {
                info!(symbol = %self.config.symbol, signal = %side, price, slow = ema.slow_last, "Crossover too far from slow EMA, waiting for pullback");
                self.machine.await_pullback(side);
                TickOutcome::idle()
            }
            Decision::CancelPending(side) => {
                info!(symbol = %self.config.symbol, signal = %side, "Trend no longer favours pending signal, discarding it");
                self.machine.reset();
                TickOutcome::idle()
            }
            Decision::Open(side) => self.open(side, price).await,
            Decision::Flip { from, to } => self.flip(from, to, price).await,
        }
    }

    fn indicators(&self, prices: &[f64]) -> Option<(f64, EmaSnapshot)> {
        let price = *prices.last()?;
        let fast = ema_series(prices, self.config.ema_fast_period);
        let slow = ema_series(prices, self.config.ema_slow_period);
        EmaSnapshot::from_series(&fast, &slow).map(|ema| (price, ema))
    }

    async fn open(&mut self, side: Side, price: f64) -> TickOutcome {
        match self.executor.open_position(side, price).await {
            Ok(trade) => {
                self.machine.enter(trade.position());
                self.resync().await;
                TickOutcome::done(TickAction::Opened)
            }
            Err(e) => TickOutcome::failed(TickAction::None, e),
        }
    }

    /// Close the held position, wait for the exchange to report flat, then
    /// open the opposite side. The open never happens unless the close
    /// succeeded and settled.
    async fn flip(&mut self, from: Side, to: Side, price: f64) -> TickOutcome {
        let held = self.machine.state().position().copied();
        let reason = format!("EMA reversal {from} -> {to}");

        match self.executor.close_position(held.as_ref(), &reason, price).await {
            Ok(true) => self.machine.reset(),
            Ok(false) => return TickOutcome::idle(),
            Err(e) => {
                self.resync().await;
                return TickOutcome::failed(TickAction::None, e);
            }
        }

        if let Err(e) = self.await_settlement().await {
            self.resync().await;
            return TickOutcome::failed(TickAction::Closed, e);
        }
        // Retry a ledger write the close could not complete.
        if let Err(e) = self.executor.settle_stale_trade().await {
            self.resync().await;
            return TickOutcome::failed(TickAction::Closed, e);
        }

        match self.executor.open_position(to, price).await {
            Ok(trade) => {
                self.machine.enter(trade.position());
                self.resync().await;
                TickOutcome::done(TickAction::Flipped)
            }
            Err(e) => {
                self.resync().await;
                TickOutcome::failed(TickAction::Closed, e)
            }
        }
    }

    async fn await_settlement(&self) -> Result<()> {
        sleep(self.timing.settle_delay).await;
        let deadline = Instant::now() + self.timing.settle_timeout;

        loop {
            match self.exchange_position().await {
                Ok(None) => return Ok(()),
                Ok(Some(p)) => debug!(symbol = %self.config.symbol, side = %p.side, qty = p.quantity, "Close not settled yet"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(symbol = %self.config.symbol, error = %e, "Settlement poll failed"),
            }

            if Instant::now() >= deadline {
                return Err(GatewayError::transient(format!(
                    "close of {} not settled within {:?}, skipping the reverse open",
                    self.config.symbol, self.timing.settle_timeout
                ))
                .into());
            }
            sleep(self.timing.settle_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_signal_wakes_waiters() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.requested().await })
        };
        tokio::task::yield_now().await;
        stop.request();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(stop.is_requested());
    }

    #[tokio::test]
    async fn requested_returns_immediately_once_set() {
        let stop = StopSignal::new();
        stop.request();
        tokio::time::timeout(Duration::from_millis(50), stop.requested()).await.unwrap();
    }
}
