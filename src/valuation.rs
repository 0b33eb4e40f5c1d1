use ibdesk_gateway::{PositionSnapshot, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;

const PERCENT: Decimal = Decimal::ONE_HUNDRED;
const PNL_PCT_DECIMALS: u32 = 4;

/// A position marked to market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Negative for short positions.
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub last_price: Decimal,
    /// False when `last_price` fell back to the average cost.
    pub price_is_live: bool,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
}

/// Marks a position at `live_price`, or at its average cost when the price is not
/// positive (the gateway reports zero when it has no quote).
pub fn valuate(snapshot: &PositionSnapshot, live_price: Decimal) -> Position {
    let price_is_live = live_price > Decimal::ZERO;
    let last_price = if price_is_live {
        live_price
    } else {
        snapshot.avg_cost
    };

    let market_value = snapshot.quantity * last_price;
    let cost_basis = snapshot.quantity * snapshot.avg_cost;
    let unrealized_pnl = market_value - cost_basis;

    let unrealized_pnl_pct = if cost_basis.is_zero() {
        Decimal::ZERO
    } else {
        (unrealized_pnl / cost_basis.abs() * PERCENT)
            .round_dp(PNL_PCT_DECIMALS)
            .normalize()
    };

    Position {
        symbol: snapshot.instrument.symbol.clone(),
        quantity: snapshot.quantity,
        avg_cost: snapshot.avg_cost,
        last_price,
        price_is_live,
        market_value,
        cost_basis,
        unrealized_pnl,
        unrealized_pnl_pct,
    }
}
