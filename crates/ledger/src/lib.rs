pub mod ledger;
pub mod pnl;
pub mod sqlite;
pub mod store;

pub use ledger::TradeLedger;
pub use pnl::{realized_pnl, Pnl};
pub use sqlite::SqliteTradeStore;
pub use store::{MemoryTradeStore, TradeStore};
