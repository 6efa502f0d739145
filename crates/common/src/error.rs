use thiserror::Error;

/// How an exchange failure should be treated by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Network failure, timeout or rate limit. Safe to retry on the next tick.
    Transient,
    /// The exchange refused the request (bad quantity, insufficient margin, ...).
    Rejected,
    /// Invalid credentials or symbol. Retrying will not help.
    Configuration,
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayErrorKind::Transient => write!(f, "transient"),
            GatewayErrorKind::Rejected => write!(f, "rejected"),
            GatewayErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// Error returned by every `ExchangeGateway` method.
#[derive(Debug, Clone, Error)]
#[error("exchange {kind} error: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: GatewayErrorKind::Transient, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { kind: GatewayErrorKind::Rejected, message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self { kind: GatewayErrorKind::Configuration, message: message.into() }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error taxonomy the driver acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    OrderRejected,
    Configuration,
    InvariantViolation,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Gateway(e) => match e.kind {
                GatewayErrorKind::Transient => ErrorClass::Transient,
                GatewayErrorKind::Rejected => ErrorClass::OrderRejected,
                GatewayErrorKind::Configuration => ErrorClass::Configuration,
            },
            Error::OrderRejected(_) => ErrorClass::OrderRejected,
            Error::Config(_) => ErrorClass::Configuration,
            Error::InvariantViolation(_) => ErrorClass::InvariantViolation,
            Error::Database(_) | Error::Io(_) => ErrorClass::Transient,
        }
    }

    /// Fatal errors stop the per-user loop until an operator intervenes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Configuration | ErrorClass::InvariantViolation
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
