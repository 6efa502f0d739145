pub mod config;
pub mod error;
pub mod exchange;
pub mod notifier;
pub mod types;

pub use config::Config;
pub use error::{Error, ErrorClass, GatewayError, GatewayErrorKind, GatewayResult, Result};
pub use exchange::ExchangeGateway;
pub use notifier::{LogNotifier, Notifier};
pub use types::*;
