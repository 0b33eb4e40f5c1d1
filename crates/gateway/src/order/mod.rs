use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Direction, Shares, Symbol};

mod log;
mod status;

pub use log::{LogEntry, Severity, most_severe};
pub use status::{GatewayOrderStatus, ParseOrderStatusError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    Limit { price: Decimal },
}

impl OrderKind {
    pub const fn limit_price(&self) -> Option<Decimal> {
        match self {
            Self::Market => None,
            Self::Limit { price } => Some(*price),
        }
    }
}

/// What the gateway is asked to transmit. Orders are always transmitted immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub direction: Direction,
    pub shares: Shares,
    pub kind: OrderKind,
    /// Allow execution outside regular trading hours.
    pub outside_rth: bool,
}

/// Reference to an order that the gateway has accepted for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionHandle {
    pub order_id: i64,
    pub symbol: Symbol,
}

/// Point-in-time view of a submitted order.
///
/// `status` is `None` until the gateway has reported anything for the order. `log`
/// carries every diagnostic entry the gateway has accumulated for it so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub order_id: i64,
    pub status: Option<GatewayOrderStatus>,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub log: Vec<LogEntry>,
}

impl StatusSnapshot {
    /// Nothing reported yet; the whole quantity remains.
    pub fn unreported(order_id: i64, quantity: Shares) -> Self {
        Self {
            order_id,
            status: None,
            filled: Decimal::ZERO,
            remaining: quantity.as_decimal(),
            avg_fill_price: None,
            log: Vec::new(),
        }
    }

    pub fn most_severe_entry(&self) -> Option<&LogEntry> {
        most_severe(&self.log)
    }
}

/// An order as listed by the gateway's order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: i64,
    pub symbol: Symbol,
    pub direction: Direction,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub status: Option<GatewayOrderStatus>,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Option<Decimal>,
}
