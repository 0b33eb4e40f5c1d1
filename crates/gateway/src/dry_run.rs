use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

use crate::{
    AccountSummary, Direction, Gateway, GatewayError, GatewayOrderStatus, Instrument, LogEntry,
    OrderKind, OrderSnapshot, OrderSpec, PositionSnapshot, StatusSnapshot, SubmissionHandle,
    Symbol,
};

#[derive(Debug, Clone)]
pub struct DryRunConfig {
    pub client_id: i32,
    /// Polls an order stays in `PendingSubmit` before it is worked.
    pub fill_after_polls: u32,
    /// Price every symbol trades at.
    pub quote: Decimal,
    pub starting_cash: Decimal,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            client_id: 1,
            fill_after_polls: 2,
            quote: Decimal::new(10050, 2),
            starting_cash: Decimal::from(1_000_000),
        }
    }
}

#[derive(Debug)]
struct DryRunOrder {
    order_id: i64,
    instrument: Instrument,
    spec: OrderSpec,
    polls: u32,
    status: GatewayOrderStatus,
    fill_price: Option<Decimal>,
    log: Vec<LogEntry>,
}

impl DryRunOrder {
    fn filled(&self) -> Decimal {
        if self.fill_price.is_some() {
            self.spec.shares.as_decimal()
        } else {
            Decimal::ZERO
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        let filled = self.filled();
        StatusSnapshot {
            order_id: self.order_id,
            status: Some(self.status),
            filled,
            remaining: self.spec.shares.as_decimal() - filled,
            avg_fill_price: self.fill_price,
            log: self.log.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Holding {
    quantity: Decimal,
    avg_cost: Decimal,
}

/// Paper session that logs every operation and simulates the gateway's order lifecycle
/// in memory. Nothing leaves the process.
#[derive(Debug)]
pub struct DryRunGateway {
    config: DryRunConfig,
    next_sequence: i64,
    orders: Vec<DryRunOrder>,
    holdings: HashMap<Symbol, (Instrument, Holding)>,
    cash: Decimal,
}

impl DryRunGateway {
    fn generate_order_id(&mut self) -> i64 {
        self.next_sequence += 1;
        i64::from(self.config.client_id) * 1_000_000 + self.next_sequence
    }

    fn is_marketable(&self, spec: &OrderSpec) -> bool {
        match (spec.kind, spec.direction) {
            (OrderKind::Market, _) => true,
            (OrderKind::Limit { price }, Direction::Buy) => price >= self.config.quote,
            (OrderKind::Limit { price }, Direction::Sell) => price <= self.config.quote,
        }
    }

    fn apply_fill(&mut self, instrument: &Instrument, direction: Direction, shares: Decimal) {
        let price = self.config.quote;
        let delta = direction.sign() * shares;
        self.cash -= delta * price;

        let entry = self
            .holdings
            .entry(instrument.symbol.clone())
            .or_insert_with(|| {
                (
                    instrument.clone(),
                    Holding {
                        quantity: Decimal::ZERO,
                        avg_cost: Decimal::ZERO,
                    },
                )
            });
        let holding = &mut entry.1;
        let new_quantity = holding.quantity + delta;

        if new_quantity.is_zero() {
            self.holdings.remove(&instrument.symbol);
            return;
        }

        let same_side = holding.quantity.is_zero()
            || holding.quantity.is_sign_positive() == delta.is_sign_positive();
        let crossed = holding.quantity.is_sign_positive() != new_quantity.is_sign_positive();

        if same_side {
            holding.avg_cost =
                (holding.quantity * holding.avg_cost + delta * price) / new_quantity;
        } else if crossed {
            holding.avg_cost = price;
        }
        holding.quantity = new_quantity;
    }

    fn advance(&mut self, index: usize) {
        let fill_after_polls = self.config.fill_after_polls;
        let marketable = self.is_marketable(&self.orders[index].spec);
        let order = &mut self.orders[index];
        order.polls += 1;

        if order.status.is_terminal() || order.polls < fill_after_polls {
            return;
        }

        if !marketable {
            order.status = GatewayOrderStatus::Submitted;
            return;
        }

        order.status = GatewayOrderStatus::Filled;
        order.fill_price = Some(self.config.quote);
        order.log.push(LogEntry::new(
            format!(
                "Simulated fill of {} {} at {}",
                order.spec.shares, order.instrument.symbol, self.config.quote
            ),
            0,
        ));

        let instrument = order.instrument.clone();
        let direction = order.spec.direction;
        let shares = order.spec.shares.as_decimal();
        self.apply_fill(&instrument, direction, shares);
    }
}

fn contract_id_for(symbol: &str) -> i64 {
    symbol
        .bytes()
        .fold(0_i64, |acc, byte| acc * 31 + i64::from(byte))
}

#[async_trait]
impl Gateway for DryRunGateway {
    type Config = DryRunConfig;

    async fn connect(config: Self::Config) -> Result<Self, GatewayError> {
        warn!(
            "[DRY-RUN] Opening paper session for client id {} - no orders will reach a broker",
            config.client_id
        );
        Ok(Self {
            cash: config.starting_cash,
            config,
            next_sequence: 0,
            orders: Vec::new(),
            holdings: HashMap::new(),
        })
    }

    async fn resolve_instrument(&mut self, symbol: &Symbol) -> Result<Instrument, GatewayError> {
        if !is_listed(&symbol.0) {
            warn!("[DRY-RUN] No contract for symbol {symbol}");
            return Err(GatewayError::InstrumentNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(Instrument::us_stock(symbol.clone(), contract_id_for(&symbol.0)))
    }

    async fn submit(
        &mut self,
        instrument: &Instrument,
        spec: &OrderSpec,
    ) -> Result<SubmissionHandle, GatewayError> {
        let order_id = self.generate_order_id();

        warn!(
            "[DRY-RUN] Would transmit order: {} {} shares of {} as {:?} (order_id: {})",
            spec.direction, spec.shares, instrument.symbol, spec.kind, order_id
        );

        self.orders.push(DryRunOrder {
            order_id,
            instrument: instrument.clone(),
            spec: spec.clone(),
            polls: 0,
            status: GatewayOrderStatus::PendingSubmit,
            fill_price: None,
            log: Vec::new(),
        });

        Ok(SubmissionHandle {
            order_id,
            symbol: instrument.symbol.clone(),
        })
    }

    async fn poll_status(
        &mut self,
        handle: &SubmissionHandle,
    ) -> Result<StatusSnapshot, GatewayError> {
        let index = self
            .orders
            .iter()
            .position(|order| order.order_id == handle.order_id)
            .ok_or(GatewayError::OrderNotFound {
                order_id: handle.order_id,
            })?;

        self.advance(index);
        Ok(self.orders[index].snapshot())
    }

    async fn positions(&mut self) -> Result<Vec<PositionSnapshot>, GatewayError> {
        let mut positions: Vec<_> = self
            .holdings
            .values()
            .map(|(instrument, holding)| PositionSnapshot {
                instrument: instrument.clone(),
                quantity: holding.quantity,
                avg_cost: holding.avg_cost,
            })
            .collect();
        positions.sort_by(|a, b| a.instrument.symbol.0.cmp(&b.instrument.symbol.0));
        Ok(positions)
    }

    async fn price_of(&mut self, _instrument: &Instrument) -> Result<Decimal, GatewayError> {
        Ok(self.config.quote)
    }

    async fn account_summary(&mut self) -> Result<AccountSummary, GatewayError> {
        let holdings_value: Decimal = self
            .holdings
            .values()
            .map(|(_, holding)| holding.quantity * self.config.quote)
            .sum();

        Ok(AccountSummary {
            account_id: format!("DRY_RUN_{}", self.config.client_id),
            net_liquidation: self.cash + holdings_value,
            buying_power: self.cash,
            cash_balance: self.cash,
        })
    }

    async fn recent_orders(&mut self, limit: usize) -> Result<Vec<OrderSnapshot>, GatewayError> {
        Ok(self
            .orders
            .iter()
            .rev()
            .take(limit)
            .map(|order| {
                let filled = order.filled();
                OrderSnapshot {
                    order_id: order.order_id,
                    symbol: order.instrument.symbol.clone(),
                    direction: order.spec.direction,
                    quantity: order.spec.shares.as_decimal(),
                    limit_price: order.spec.kind.limit_price(),
                    status: Some(order.status),
                    filled,
                    remaining: order.spec.shares.as_decimal() - filled,
                    avg_fill_price: order.fill_price,
                }
            })
            .collect())
    }

    async fn disconnect(self) -> Result<(), GatewayError> {
        warn!(
            "[DRY-RUN] Closing paper session for client id {} after {} orders",
            self.config.client_id,
            self.orders.len()
        );
        Ok(())
    }
}

/// A root of up to five letters, optionally followed by a share class such as
/// `BRK B` or `BF.B`.
fn is_listed(symbol: &str) -> bool {
    let letters = |part: &str, max: usize| {
        !part.is_empty() && part.len() <= max && part.chars().all(|c| c.is_ascii_uppercase())
    };

    match symbol.split_once([' ', '.']) {
        Some((root, class)) => letters(root, 5) && letters(class, 2),
        None => letters(symbol, 5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shares;
    use rust_decimal_macros::dec;

    fn market(direction: Direction, shares: u32) -> OrderSpec {
        OrderSpec {
            direction,
            shares: Shares(shares),
            kind: OrderKind::Market,
            outside_rth: true,
        }
    }

    async fn connect() -> DryRunGateway {
        DryRunGateway::connect(DryRunConfig::default()).await.unwrap()
    }

    async fn place(
        gateway: &mut DryRunGateway,
        symbol: &str,
        spec: &OrderSpec,
    ) -> SubmissionHandle {
        let instrument = gateway
            .resolve_instrument(&Symbol(symbol.to_string()))
            .await
            .unwrap();
        gateway.submit(&instrument, spec).await.unwrap()
    }

    #[tokio::test]
    async fn test_rejects_unknown_symbols() {
        let mut gateway = connect().await;

        for symbol in ["", "toolong", "ab1", "lower", "BRK BBB", "BRK.", "BRK B C"] {
            let err = gateway
                .resolve_instrument(&Symbol(symbol.to_string()))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InstrumentNotFound { .. }));
        }
    }

    #[tokio::test]
    async fn test_resolves_share_class_symbols() {
        let mut gateway = connect().await;

        for symbol in ["BRK B", "BRK.B", "BF.B"] {
            let instrument = gateway
                .resolve_instrument(&Symbol(symbol.to_string()))
                .await
                .unwrap();
            assert_eq!(instrument.symbol, Symbol(symbol.to_string()));
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_after_configured_polls() {
        let mut gateway = connect().await;
        let handle = place(&mut gateway, "AAPL", &market(Direction::Buy, 10)).await;

        let first = gateway.poll_status(&handle).await.unwrap();
        assert_eq!(first.status, Some(GatewayOrderStatus::PendingSubmit));
        assert_eq!(first.filled, Decimal::ZERO);

        let second = gateway.poll_status(&handle).await.unwrap();
        assert_eq!(second.status, Some(GatewayOrderStatus::Filled));
        assert_eq!(second.filled, dec!(10));
        assert_eq!(second.remaining, Decimal::ZERO);
        assert_eq!(second.avg_fill_price, Some(dec!(100.50)));
        assert_eq!(second.log.len(), 1);

        let positions = gateway.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(10));
        assert_eq!(positions[0].avg_cost, dec!(100.50));
    }

    #[tokio::test]
    async fn test_unmarketable_limit_order_stays_working() {
        let mut gateway = connect().await;
        let spec = OrderSpec {
            direction: Direction::Buy,
            shares: Shares(5),
            kind: OrderKind::Limit { price: dec!(90) },
            outside_rth: false,
        };
        let handle = place(&mut gateway, "MSFT", &spec).await;

        for _ in 0..4 {
            gateway.poll_status(&handle).await.unwrap();
        }

        let snapshot = gateway.poll_status(&handle).await.unwrap();
        assert_eq!(snapshot.status, Some(GatewayOrderStatus::Submitted));
        assert_eq!(snapshot.remaining, dec!(5));
        assert!(gateway.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_ids_are_namespaced_by_client_id() {
        let mut gateway = DryRunGateway::connect(DryRunConfig {
            client_id: 7,
            ..DryRunConfig::default()
        })
        .await
        .unwrap();

        let first = place(&mut gateway, "AAPL", &market(Direction::Buy, 1)).await;
        let second = place(&mut gateway, "AAPL", &market(Direction::Buy, 1)).await;

        assert_eq!(first.order_id, 7_000_001);
        assert_eq!(second.order_id, 7_000_002);
    }

    #[tokio::test]
    async fn test_poll_unknown_order() {
        let mut gateway = connect().await;
        let err = gateway
            .poll_status(&SubmissionHandle {
                order_id: 99,
                symbol: Symbol("AAPL".to_string()),
            })
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::OrderNotFound { order_id: 99 });
    }

    #[tokio::test]
    async fn test_closing_a_position_removes_it_and_restores_cash() {
        let mut gateway = connect().await;
        let buy = place(&mut gateway, "AAPL", &market(Direction::Buy, 10)).await;
        gateway.poll_status(&buy).await.unwrap();
        gateway.poll_status(&buy).await.unwrap();

        let sell = place(&mut gateway, "AAPL", &market(Direction::Sell, 10)).await;
        gateway.poll_status(&sell).await.unwrap();
        gateway.poll_status(&sell).await.unwrap();

        assert!(gateway.positions().await.unwrap().is_empty());
        let summary = gateway.account_summary().await.unwrap();
        assert_eq!(summary.cash_balance, dec!(1000000));
        assert_eq!(summary.net_liquidation, dec!(1000000));
    }

    #[tokio::test]
    async fn test_recent_orders_are_newest_first_and_limited() {
        let mut gateway = connect().await;
        for symbol in ["AAPL", "MSFT", "TSLA"] {
            place(&mut gateway, symbol, &market(Direction::Buy, 1)).await;
        }

        let orders = gateway.recent_orders(2).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].symbol, Symbol("TSLA".to_string()));
        assert_eq!(orders[1].symbol, Symbol("MSFT".to_string()));
        assert_eq!(orders[0].status, Some(GatewayOrderStatus::PendingSubmit));
    }

    #[tokio::test]
    async fn test_account_summary_marks_holdings_at_quote() {
        let mut gateway = connect().await;
        let handle = place(&mut gateway, "AAPL", &market(Direction::Buy, 100)).await;
        gateway.poll_status(&handle).await.unwrap();
        gateway.poll_status(&handle).await.unwrap();

        let summary = gateway.account_summary().await.unwrap();
        assert_eq!(summary.account_id, "DRY_RUN_1");
        assert_eq!(summary.cash_balance, dec!(989950));
        assert_eq!(summary.net_liquidation, dec!(1000000));
    }
}
