use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub mod account;
pub mod client_portal;
pub mod dry_run;
pub mod error;
pub mod instrument;
pub mod order;

pub use account::{AccountSummary, PositionSnapshot};
pub use client_portal::{ClientPortalGateway, GatewayEnv};
pub use dry_run::{DryRunConfig, DryRunGateway};
pub use error::GatewayError;
pub use instrument::Instrument;
pub use order::{
    GatewayOrderStatus, LogEntry, OrderKind, OrderSnapshot, OrderSpec, Severity, StatusSnapshot,
    SubmissionHandle,
};
pub use test::{GatewayCall, GatewayScript, OrderScript, ScriptedGateway};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shares(pub u32);

impl Shares {
    pub fn as_decimal(self) -> Decimal {
        Decimal::from(self.0)
    }
}

impl Display for Shares {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDirectionError(String);

impl std::fmt::Display for InvalidDirectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid direction: {}", self.0)
    }
}

impl std::error::Error for InvalidDirectionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = InvalidDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            _ => Err(InvalidDirectionError(s.to_string())),
        }
    }
}

/// One exclusive session against the brokerage gateway.
///
/// Every method takes `&mut self`: a session has exactly one owner and is never
/// driven from two places at once. The owner is expected to create the session
/// with [`Gateway::connect`] inside its own task and tear it down there with
/// [`Gateway::disconnect`].
///
/// Any method may fail with [`GatewayError::ConnectionLost`], after which the
/// session must be considered dead.
#[async_trait]
pub trait Gateway: Send + Sized + 'static {
    type Config: Send + Sync + Clone + 'static;

    /// Open the session. Fails with [`GatewayError::ConnectionRefused`] when the
    /// gateway cannot be reached or will not accept this client.
    async fn connect(config: Self::Config) -> Result<Self, GatewayError>;

    /// Qualify a symbol into a tradable instrument, or fail with
    /// [`GatewayError::InstrumentNotFound`].
    async fn resolve_instrument(&mut self, symbol: &Symbol) -> Result<Instrument, GatewayError>;

    /// Transmit an order. The order is live at the gateway once this returns.
    async fn submit(
        &mut self,
        instrument: &Instrument,
        spec: &OrderSpec,
    ) -> Result<SubmissionHandle, GatewayError>;

    async fn poll_status(&mut self, handle: &SubmissionHandle)
    -> Result<StatusSnapshot, GatewayError>;

    async fn positions(&mut self) -> Result<Vec<PositionSnapshot>, GatewayError>;

    /// Last traded price, or zero when the gateway has no usable quote.
    async fn price_of(&mut self, instrument: &Instrument) -> Result<Decimal, GatewayError>;

    async fn account_summary(&mut self) -> Result<AccountSummary, GatewayError>;

    /// The session's most recent orders, newest first.
    async fn recent_orders(&mut self, limit: usize) -> Result<Vec<OrderSnapshot>, GatewayError>;

    async fn disconnect(self) -> Result<(), GatewayError>;
}
