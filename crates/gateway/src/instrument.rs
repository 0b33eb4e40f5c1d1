use serde::{Deserialize, Serialize};

use crate::Symbol;

/// A symbol qualified by the gateway into something it can route orders for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    /// Gateway contract id.
    pub contract_id: i64,
    pub exchange: String,
    pub currency: String,
}

impl Instrument {
    /// US equity routed through smart order routing.
    pub fn us_stock(symbol: Symbol, contract_id: i64) -> Self {
        Self {
            symbol,
            contract_id,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_us_stock_defaults() {
        let instrument = Instrument::us_stock(Symbol("AAPL".to_string()), 265_598);
        assert_eq!(instrument.exchange, "SMART");
        assert_eq!(instrument.currency, "USD");
        assert_eq!(instrument.contract_id, 265_598);
    }
}
