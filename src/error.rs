use ibdesk_gateway::GatewayError;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Order request problems caught before anything is queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(
        "Invalid ticker symbol: {symbol:?}. Ticker symbols are up to 12 letters or digits with optional ' ', '.', '/' or '-' separators"
    )]
    InvalidSymbol { symbol: String },
    #[error("Invalid quantity: 0. Quantity must be greater than zero")]
    ZeroQuantity,
    #[error("Invalid quantity: {value}. Quantity must not exceed {max}")]
    QuantityTooLarge { value: u64, max: u32 },
    #[error("Limit orders require a limit price")]
    MissingLimitPrice,
    #[error("Market orders must not carry a limit price")]
    UnexpectedLimitPrice,
    #[error("Invalid limit price: {price}. Limit price must be greater than zero")]
    NonPositiveLimitPrice { price: Decimal },
    #[error("Invalid timeout: 0 seconds. Timeout must be at least one second")]
    ZeroTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Order worker is not running")]
    WorkerUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Order worker is not running")]
    WorkerUnavailable,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("No answer from order worker within {0:?}")]
    TimedOut(Duration),
}

/// Reasons the worker failed to start or stopped on its own.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to connect to gateway: {0}")]
    Connect(#[source] GatewayError),
    #[error("Gateway connection lost: {0}")]
    ConnectionLost(#[source] GatewayError),
    #[error("Order worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Order worker exited before reporting readiness")]
    StartupAborted,
}
