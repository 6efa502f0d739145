use std::time::Duration;

use crate::{Error, Network, Result, TradingMode};

/// Settlement delays shorter than this race the exchange's position update.
pub const MIN_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Process-wide configuration loaded from environment variables at startup.
/// Per-user bot definitions live in the bots file at `bots_config_path`.
#[derive(Debug, Clone)]
pub struct Config {
    // Trading
    pub trading_mode: TradingMode,
    pub binance_network: Network,
    pub paper_slippage_bps: f64,

    // Telegram (notifications go to the log when absent)
    pub telegram_token: Option<String>,

    // Database
    pub database_url: String,

    // Bots file path
    pub bots_config_path: String,

    // Timing
    pub tick_interval: Duration,
    pub gateway_timeout: Duration,
    pub settle_delay: Duration,
    pub settle_timeout: Duration,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE")?.to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
                )))
            }
        };

        let binance_network = match required_env("BINANCE_NETWORK")?.to_lowercase().as_str() {
            "mainnet" => Network::Mainnet,
            "testnet" => Network::Testnet,
            other => {
                return Err(Error::Config(format!(
                    "BINANCE_NETWORK must be 'mainnet' or 'testnet', got: '{other}'"
                )))
            }
        };

        Ok(Config {
            trading_mode,
            binance_network,
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 10.0)?,
            telegram_token: optional_env("TELEGRAM_TOKEN").filter(|t| !t.trim().is_empty()),
            database_url: required_env("DATABASE_URL")?,
            bots_config_path: optional_env("BOTS_CONFIG_PATH")
                .unwrap_or_else(|| "config/bots.toml".to_string()),
            tick_interval: Duration::from_secs(parsed_env("TICK_INTERVAL_SECS", 60)?),
            gateway_timeout: Duration::from_secs(parsed_env("GATEWAY_TIMEOUT_SECS", 10)?),
            settle_delay: Duration::from_secs(parsed_env("SETTLE_DELAY_SECS", 2)?)
                .max(MIN_SETTLE_DELAY),
            settle_timeout: Duration::from_secs(parsed_env("SETTLE_TIMEOUT_SECS", 15)?),
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}
