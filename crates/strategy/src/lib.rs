pub mod config;
pub mod indicators;
pub mod machine;

pub use config::{BotConfig, BotFileConfig, StrategyConfig};
pub use indicators::{ema_series, EmaSnapshot};
pub use machine::{is_near_ema, Decision, EngineState, Phase, PositionStateMachine, Reconciliation};
