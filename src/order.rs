use ibdesk_gateway::{
    Direction, GatewayOrderStatus, OrderKind, OrderSpec, Shares, StatusSnapshot, Symbol,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

/// A validated order, ready to cross the queue. Only constructible through
/// [`OrderRequest::new`], so a limit price is present exactly when the order is a
/// limit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    symbol: Symbol,
    direction: Direction,
    shares: Shares,
    kind: OrderKind,
    timeout: Duration,
}

const MAX_SYMBOL_LEN: usize = 12;

/// Only the shape of the symbol is checked here. Whether it names a real contract is
/// up to the gateway.
fn validate_symbol(symbol: &str) -> Result<Symbol, ValidationError> {
    let symbol = symbol.trim().to_uppercase();

    let well_formed = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '/' | '-'));

    if !well_formed {
        return Err(ValidationError::InvalidSymbol { symbol });
    }

    Ok(Symbol(symbol))
}

impl OrderRequest {
    pub fn new(
        symbol: &str,
        direction: Direction,
        quantity: u64,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        timeout_secs: u64,
    ) -> Result<Self, ValidationError> {
        let symbol = validate_symbol(symbol)?;

        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        let shares = u32::try_from(quantity).map_err(|_| ValidationError::QuantityTooLarge {
            value: quantity,
            max: u32::MAX,
        })?;

        let kind = match (order_type, limit_price) {
            (OrderType::Market, None) => OrderKind::Market,
            (OrderType::Market, Some(_)) => return Err(ValidationError::UnexpectedLimitPrice),
            (OrderType::Limit, None) => return Err(ValidationError::MissingLimitPrice),
            (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => {
                return Err(ValidationError::NonPositiveLimitPrice { price });
            }
            (OrderType::Limit, Some(price)) => OrderKind::Limit { price },
        };

        if timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }

        Ok(Self {
            symbol,
            direction,
            shares: Shares(shares),
            kind,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub const fn direction(&self) -> Direction {
        self.direction
    }

    pub const fn shares(&self) -> Shares {
        self.shares
    }

    pub const fn kind(&self) -> OrderKind {
        self.kind
    }

    /// How long the worker keeps polling before reporting `TimedOut`.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn to_order_spec(&self, outside_rth: bool) -> OrderSpec {
        OrderSpec {
            direction: self.direction,
            shares: self.shares,
            kind: self.kind,
            outside_rth,
        }
    }
}

/// Inbound order as callers send it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub symbol: String,
    pub side: Direction,
    pub quantity: u64,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl PlaceOrder {
    pub fn validate(&self, default_timeout: Duration) -> Result<OrderRequest, ValidationError> {
        OrderRequest::new(
            &self.symbol,
            self.side,
            self.quantity,
            self.order_type,
            self.limit_price,
            self.timeout_seconds
                .unwrap_or_else(|| default_timeout.as_secs()),
        )
    }
}

/// Status carried by an [`OrderResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    PreSubmitted,
    Filled,
    Cancelled,
    Inactive,
    ApiCancelled,
    TimedOut,
    Error,
}

impl OrderStatus {
    /// The result status for a gateway status that ends polling, if it does.
    pub const fn settled(status: GatewayOrderStatus) -> Option<Self> {
        match status {
            GatewayOrderStatus::Submitted => Some(Self::Submitted),
            GatewayOrderStatus::PreSubmitted => Some(Self::PreSubmitted),
            GatewayOrderStatus::Filled => Some(Self::Filled),
            GatewayOrderStatus::Cancelled => Some(Self::Cancelled),
            GatewayOrderStatus::Inactive => Some(Self::Inactive),
            GatewayOrderStatus::ApiCancelled => Some(Self::ApiCancelled),
            GatewayOrderStatus::PendingSubmit
            | GatewayOrderStatus::PendingCancel
            | GatewayOrderStatus::ApiPending => None,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Submitted | Self::PreSubmitted | Self::Filled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::PreSubmitted => "PreSubmitted",
            Self::Filled => "Filled",
            Self::Cancelled => "Cancelled",
            Self::Inactive => "Inactive",
            Self::ApiCancelled => "ApiCancelled",
            Self::TimedOut => "TimedOut",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an order did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InstrumentNotFound,
    ConnectionLost,
    Rejected,
    /// Status unknown; reconcile through positions or recent orders.
    TimedOut,
    WorkerStopped,
    Gateway,
}

/// How an [`OrderResult`] should be read by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected,
    TimedOut,
    Error,
}

/// Final answer for one order request. `success` is true only for the accepted
/// statuses `Submitted`, `PreSubmitted` and `Filled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderResult {
    success: bool,
    order_id: Option<i64>,
    status: OrderStatus,
    filled_quantity: Decimal,
    remaining_quantity: Decimal,
    avg_fill_price: Option<Decimal>,
    error_message: Option<String>,
    failure: Option<FailureKind>,
}

impl OrderResult {
    /// Result for a snapshot whose status ended polling. Statuses that do not end
    /// polling are reported as `Error`.
    pub(crate) fn settled(snapshot: &StatusSnapshot, error_message: Option<String>) -> Self {
        let status = snapshot
            .status
            .and_then(OrderStatus::settled)
            .unwrap_or(OrderStatus::Error);
        let success = status.is_success();

        Self {
            success,
            order_id: Some(snapshot.order_id),
            status,
            filled_quantity: snapshot.filled,
            remaining_quantity: snapshot.remaining,
            avg_fill_price: snapshot.avg_fill_price,
            error_message: if success { None } else { error_message },
            failure: if success {
                None
            } else if status == OrderStatus::Error {
                Some(FailureKind::Gateway)
            } else {
                Some(FailureKind::Rejected)
            },
        }
    }

    /// The worker gave up polling; the order may still be live at the gateway.
    pub(crate) fn timed_out(
        order_id: i64,
        last: Option<&StatusSnapshot>,
        shares: Shares,
        message: String,
    ) -> Self {
        Self {
            success: false,
            order_id: Some(order_id),
            status: OrderStatus::TimedOut,
            filled_quantity: last.map_or(Decimal::ZERO, |s| s.filled),
            remaining_quantity: last.map_or_else(|| shares.as_decimal(), |s| s.remaining),
            avg_fill_price: last.and_then(|s| s.avg_fill_price),
            error_message: Some(message),
            failure: Some(FailureKind::TimedOut),
        }
    }

    /// The caller stopped waiting; nothing is known about the order.
    pub(crate) fn caller_timed_out(shares: Shares, waited: Duration) -> Self {
        Self {
            success: false,
            order_id: None,
            status: OrderStatus::TimedOut,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: shares.as_decimal(),
            avg_fill_price: None,
            error_message: Some(format!(
                "No result within {}s; the order may still execute, reconcile via positions or recent orders",
                waited.as_secs()
            )),
            failure: Some(FailureKind::TimedOut),
        }
    }

    pub(crate) fn error(
        order_id: Option<i64>,
        failure: FailureKind,
        message: impl Into<String>,
        shares: Shares,
    ) -> Self {
        Self {
            success: false,
            order_id,
            status: OrderStatus::Error,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: shares.as_decimal(),
            avg_fill_price: None,
            error_message: Some(message.into()),
            failure: Some(failure),
        }
    }

    pub const fn success(&self) -> bool {
        self.success
    }

    pub const fn order_id(&self) -> Option<i64> {
        self.order_id
    }

    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    pub const fn filled_quantity(&self) -> Decimal {
        self.filled_quantity
    }

    pub const fn remaining_quantity(&self) -> Decimal {
        self.remaining_quantity
    }

    pub const fn avg_fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub const fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub const fn outcome(&self) -> Outcome {
        match self.status {
            OrderStatus::TimedOut => Outcome::TimedOut,
            OrderStatus::Error => Outcome::Error,
            _ if self.success => Outcome::Accepted,
            _ => Outcome::Rejected,
        }
    }
}
