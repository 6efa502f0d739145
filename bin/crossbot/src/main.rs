use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, Error, ExchangeGateway, LogNotifier, Notifier, TradingMode};
use engine::{drive, BinanceFuturesClient, Engine, EngineTiming, RunnerExit, StopSignal};
use ledger::{SqliteTradeStore, TradeLedger};
use paper::PaperClient;
use strategy::{BotConfig, BotFileConfig};
use telegram_notify::TelegramNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(mode = %cfg.trading_mode, network = %cfg.binance_network, "Crossbot starting");

    let bots = BotFileConfig::load(&cfg.bots_config_path)
        .with_context(|| format!("loading bots from {}", cfg.bots_config_path))?;
    if bots.bots.is_empty() {
        anyhow::bail!("no [[bot]] entries in {}", cfg.bots_config_path);
    }

    // ── Ledger ────────────────────────────────────────────────────────────────
    let store = SqliteTradeStore::connect(&cfg.database_url)
        .await
        .context("opening trade database")?;
    let ledger = Arc::new(TradeLedger::new(Arc::new(store)));

    // ── Bots ──────────────────────────────────────────────────────────────────
    if cfg.telegram_token.is_none() {
        info!("TELEGRAM_TOKEN not set, bots without their own token notify through the log");
    }
    let mut telegram_bots: HashMap<String, teloxide::Bot> = HashMap::new();
    let timing = EngineTiming::from_config(&cfg);
    let stop = StopSignal::new();
    let mut tasks = JoinSet::new();

    for bot in bots.bots {
        let notifier = notifier_for(&bot, cfg.telegram_token.as_deref(), &mut telegram_bots);

        let gateway = match gateway_for(&cfg, &bot) {
            Ok(gateway) => gateway,
            Err(e) => {
                error!(user = %bot.user, error = %e, "Bot not started");
                notifier.notify(&format!("❌ Bot not started\n{e}")).await;
                continue;
            }
        };

        let engine = match Engine::new(
            bot.user.clone(),
            bot.strategy.clone(),
            gateway,
            ledger.clone(),
            notifier.clone(),
            timing,
        )
        .await
        {
            Ok(engine) => engine.with_stop_signal(stop.clone()),
            Err(e) => {
                error!(user = %bot.user, error = %e, "Bot not started");
                notifier.notify(&format!("❌ Bot not started\n{e}")).await;
                continue;
            }
        };

        let user = bot.user.clone();
        let interval = cfg.tick_interval;
        tasks.spawn(async move { (user, drive(engine, interval).await) });
    }

    if tasks.is_empty() {
        anyhow::bail!("none of the configured bots could be started");
    }
    info!(bots = tasks.len(), "Crossbot running. Press Ctrl-C to stop.");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Could not listen for Ctrl-C, stopping"),
            }
            stop.request();
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((user, RunnerExit::Stopped)) => info!(user = %user, "Bot stopped"),
            Ok((user, RunnerExit::Halted(reason))) => {
                error!(user = %user, reason = %reason, "Bot halted, needs an operator")
            }
            Err(e) => error!(error = %e, "Bot task panicked"),
        }
    }

    info!("Crossbot stopped");
    Ok(())
}

/// Telegram when the bot has a chat id and a token (its own or the shared
/// one), else the log. Bots with the same token share one client.
fn notifier_for(
    bot: &BotConfig,
    shared_token: Option<&str>,
    clients: &mut HashMap<String, teloxide::Bot>,
) -> Arc<dyn Notifier> {
    match (bot.telegram_token(shared_token), bot.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            let tg = clients
                .entry(token.to_string())
                .or_insert_with(|| teloxide::Bot::new(token))
                .clone();
            Arc::new(TelegramNotifier::new(tg, chat_id))
        }
        _ => Arc::new(LogNotifier::new(bot.user.clone())),
    }
}

/// Exchange client injected based on TRADING_MODE.
fn gateway_for(cfg: &Config, bot: &BotConfig) -> common::Result<Arc<dyn ExchangeGateway>> {
    match cfg.trading_mode {
        TradingMode::Live => {
            let (key, secret) = bot.credentials().ok_or_else(|| {
                Error::Config(format!("API keys not configured for user '{}'", bot.user))
            })?;
            info!(user = %bot.user, "Live trading mode, using BinanceFuturesClient");
            Ok(Arc::new(BinanceFuturesClient::new(cfg.binance_network, key, secret)?))
        }
        TradingMode::Paper => {
            info!(user = %bot.user, slippage_bps = cfg.paper_slippage_bps, "Paper trading mode, using PaperClient");
            let market = Arc::new(BinanceFuturesClient::public(cfg.binance_network)?);
            Ok(Arc::new(PaperClient::new(market, cfg.paper_slippage_bps)))
        }
    }
}
