use std::time::Duration;

use tracing::{error, info};

use crate::lifecycle::{Engine, TickAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    /// A stop was requested.
    Stopped,
    /// A fatal error ended the loop. Needs an operator.
    Halted(String),
}

/// Tick `engine` every `interval` until a stop is requested or a tick
/// returns a fatal error. A stop never interrupts a tick in progress.
pub async fn drive(mut engine: Engine, interval: Duration) -> RunnerExit {
    let stop = engine.stop_signal();
    let notifier = engine.notifier();
    let label = format!("{} {}", engine.user(), engine.symbol());

    info!(bot = %label, ?interval, "Bot started");
    notifier
        .notify(&format!("🤖 Bot started\nSymbol: {}\nMonitoring the market...", engine.symbol()))
        .await;

    let exit = loop {
        if stop.is_requested() {
            break RunnerExit::Stopped;
        }

        let outcome = engine.tick().await;
        if outcome.action != TickAction::None {
            info!(bot = %label, action = ?outcome.action, phase = %engine.state().phase(), "Tick acted");
        }
        if let Some(err) = outcome.error.filter(|e| e.is_fatal()) {
            break RunnerExit::Halted(err.to_string());
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.requested() => {}
        }
    };

    match &exit {
        RunnerExit::Stopped => {
            info!(bot = %label, "Bot stopped");
            notifier.notify(&format!("🛑 Bot stopped\nSymbol: {}", engine.symbol())).await;
        }
        RunnerExit::Halted(reason) => {
            error!(bot = %label, reason = %reason, "Bot halted");
            notifier
                .notify(&format!("⚠️ Bot halted\nSymbol: {}\nReason: {reason}\nManual intervention required.", engine.symbol()))
                .await;
        }
    }
    exit
}
