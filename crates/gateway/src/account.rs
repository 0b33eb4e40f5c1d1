use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Instrument;

/// A holding as reported by the gateway, before any valuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub instrument: Instrument,
    /// Negative for short positions.
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

/// Headline USD balances for the session's account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub net_liquidation: Decimal,
    pub buying_power: Decimal,
    pub cash_balance: Decimal,
}
