use serde::{Deserialize, Serialize};

use common::{Error, MarginMode, Result};

/// Candle intervals accepted by Binance futures klines.
const VALID_TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Leverage ceiling on Binance USDⓈ-M contracts.
const MAX_LEVERAGE: u32 = 125;

/// Binance serves at most 1500 klines per request and the engine asks for
/// twice the slow period.
pub const MAX_EMA_PERIOD: usize = 750;

/// Top-level bots file (TOML). One `[[bot]]` table per user.
///
/// Example `config/bots.toml`:
/// ```toml
/// [[bot]]
/// user = "alice"
/// api_key = "..."
/// api_secret = "..."
/// telegram_chat_id = 123456789
/// symbol = "BTCUSDT"
/// timeframe = "15m"
/// quantity_usdt = 20.0
/// leverage = 5
/// ema_fast_period = 6
/// ema_slow_period = 12
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotFileConfig {
    #[serde(rename = "bot", default)]
    pub bots: Vec<BotConfig>,
}

/// One user's bot: credentials, notification target and strategy parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    pub user: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<i64>,
    /// Per-user bot token. Falls back to the process-wide `TELEGRAM_TOKEN`.
    #[serde(default)]
    pub telegram_token: Option<String>,
    #[serde(flatten)]
    pub strategy: StrategyConfig,
}

impl BotConfig {
    /// API key and secret, if both are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        let secret = self.api_secret.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((key, secret))
    }

    /// Telegram token for this bot: its own if set, else `fallback`.
    pub fn telegram_token<'a>(&'a self, fallback: Option<&'a str>) -> Option<&'a str> {
        self.telegram_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(fallback)
    }
}

/// Parameters of the crossover/pullback strategy for one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Margin committed per position, in USDT.
    #[serde(default = "default_quantity_usdt")]
    pub quantity_usdt: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_ema_fast", alias = "ema_fast")]
    pub ema_fast_period: usize,
    #[serde(default = "default_ema_slow", alias = "ema_slow")]
    pub ema_slow_period: usize,
    /// Maximum distance between price and slow EMA, in percent, to enter.
    #[serde(default = "default_max_pullback")]
    pub max_pullback_distance_percent: f64,
    #[serde(default)]
    pub margin_mode: MarginMode,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            quantity_usdt: default_quantity_usdt(),
            leverage: default_leverage(),
            ema_fast_period: default_ema_fast(),
            ema_slow_period: default_ema_slow(),
            max_pullback_distance_percent: default_max_pullback(),
            margin_mode: MarginMode::default(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Config("symbol must not be empty".into()));
        }
        if !VALID_TIMEFRAMES.contains(&self.timeframe.as_str()) {
            return Err(Error::Config(format!("unsupported timeframe '{}'", self.timeframe)));
        }
        if !self.quantity_usdt.is_finite() || self.quantity_usdt <= 0.0 {
            return Err(Error::Config(format!(
                "quantity_usdt must be positive, got {}",
                self.quantity_usdt
            )));
        }
        if !(1..=MAX_LEVERAGE).contains(&self.leverage) {
            return Err(Error::Config(format!(
                "leverage must be between 1 and {MAX_LEVERAGE}, got {}",
                self.leverage
            )));
        }
        if self.ema_fast_period < 1 || self.ema_fast_period >= self.ema_slow_period {
            return Err(Error::Config(format!(
                "ema_fast_period ({}) must be at least 1 and below ema_slow_period ({})",
                self.ema_fast_period, self.ema_slow_period
            )));
        }
        if self.ema_slow_period > MAX_EMA_PERIOD {
            return Err(Error::Config(format!(
                "ema_slow_period must be at most {MAX_EMA_PERIOD}, got {}",
                self.ema_slow_period
            )));
        }
        if !self.max_pullback_distance_percent.is_finite()
            || self.max_pullback_distance_percent <= 0.0
        {
            return Err(Error::Config(format!(
                "max_pullback_distance_percent must be positive, got {}",
                self.max_pullback_distance_percent
            )));
        }
        Ok(())
    }

    /// Number of candles to request each tick.
    pub fn history_limit(&self) -> usize {
        (self.ema_slow_period * 2).max(200)
    }
}

impl BotFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read bots file '{path}': {e}")))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("failed to parse bots file '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn default_symbol() -> String {
    "BTCUSDT".into()
}

fn default_timeframe() -> String {
    "15m".into()
}

fn default_quantity_usdt() -> f64 {
    20.0
}

fn default_leverage() -> u32 {
    5
}

fn default_ema_fast() -> usize {
    6
}

fn default_ema_slow() -> usize {
    12
}

fn default_max_pullback() -> f64 {
    3.0
}
