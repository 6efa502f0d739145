pub mod binance;
pub mod executor;
pub mod lifecycle;
pub mod runner;
pub mod timing;

pub use binance::BinanceFuturesClient;
pub use executor::{round_quantity, OrderExecutor, DEFAULT_QUANTITY_PRECISION};
pub use lifecycle::{Engine, StopSignal, TickAction, TickOutcome};
pub use runner::{drive, RunnerExit};
pub use timing::EngineTiming;
