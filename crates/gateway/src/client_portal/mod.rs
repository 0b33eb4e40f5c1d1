//! Interactive Brokers Client Portal Web API session.
//!
//! The Client Portal gateway is a local HTTPS process that holds the brokerage login.
//! One `ClientPortalGateway` drives it for one account; order diagnostics (order
//! confirmation prompts and reject reasons) are kept per order so they can be
//! replayed with every status snapshot.

use async_trait::async_trait;
use clap::{ArgAction, Parser};
use reqwest::{RequestBuilder, Response, StatusCode};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::{
    AccountSummary, Direction, Gateway, GatewayError, GatewayOrderStatus, Instrument, LogEntry,
    OrderKind, OrderSnapshot, OrderSpec, PositionSnapshot, StatusSnapshot, SubmissionHandle,
    Symbol,
};

mod wire;

use wire::{
    Accounts, AuthStatus, LiveOrders, MarketDataSnapshot, OrderReply, OrderReplyItem,
    OrderStatusResponse, OrderTicket, OrdersRequest, PortfolioPosition, PortfolioSummary,
    ReplyConfirmation, SecdefMatch, parse_last_price,
};

/// Order confirmation prompts are answered at most this many times per submission.
const MAX_REPLY_CONFIRMATIONS: usize = 5;

/// Orders still being polled whose gateway messages are kept. Oldest ids go first.
const MAX_TRACKED_ORDERS: usize = 256;

/// Largest mantissa an `f64` carries exactly through JSON (15 significant digits).
const MAX_EXACT_PRICE_MANTISSA: i128 = 999_999_999_999_999;

/// Code attached to confirmation prompts, matching the gateway's order warning code.
const ORDER_MESSAGE_CODE: i32 = 399;

/// Code attached to a reject reason reported on an order status.
const ORDER_REJECTED_CODE: i32 = 201;

#[derive(Parser, Debug, Clone)]
pub struct GatewayEnv {
    /// Host the brokerage gateway listens on
    #[clap(long = "gateway-host", env = "GATEWAY_HOST", default_value = "127.0.0.1")]
    pub host: String,
    /// Port the brokerage gateway listens on
    #[clap(long = "gateway-port", env = "GATEWAY_PORT", default_value = "5000")]
    pub port: u16,
    /// Client id of this session; must differ from every other session on the same gateway
    #[clap(long, env, default_value = "1")]
    pub client_id: i32,
    /// Account to trade; defaults to the gateway's selected account
    #[clap(long, env)]
    pub account_id: Option<String>,
    /// Talk to the gateway over HTTPS
    #[clap(
        long = "gateway-tls",
        env = "GATEWAY_TLS",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub tls: bool,
    /// Accept the gateway's self-signed certificate
    #[clap(long, env)]
    pub accept_invalid_certs: bool,
}

impl GatewayEnv {
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}/v1/api", self.host, self.port)
    }

    fn refused(&self, reason: impl ToString) -> GatewayError {
        GatewayError::ConnectionRefused {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ClientPortalGateway {
    client: reqwest::Client,
    env: GatewayEnv,
    account_id: String,
    next_sequence: u64,
    diagnostics: BTreeMap<i64, Vec<LogEntry>>,
}

impl ClientPortalGateway {
    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.env.base_url())
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn execute(request: RequestBuilder, action: &str) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                GatewayError::ConnectionLost(e.to_string())
            } else {
                GatewayError::request(action, e)
            }
        })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::ConnectionLost(
                "gateway session is no longer authenticated".to_string(),
            ));
        }

        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        action: &str,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::request(action, e))?;

        if !status.is_success() {
            return Err(GatewayError::request(
                action,
                format!("HTTP {status}: {body}"),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            GatewayError::parse(action, format!("{e}, response: {body}"))
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        action: &str,
    ) -> Result<T, GatewayError> {
        let response = Self::execute(self.client.get(self.url(path)), action).await?;
        Self::read_json(response, action).await
    }

    fn track(&mut self, order_id: i64, log: Vec<LogEntry>) {
        self.diagnostics.insert(order_id, log);
        while self.diagnostics.len() > MAX_TRACKED_ORDERS {
            if let Some((evicted, _)) = self.diagnostics.pop_first() {
                debug!(order_id = evicted, "Dropped gateway messages of oldest tracked order");
            }
        }
    }

    fn next_client_order_id(&mut self) -> String {
        self.next_sequence += 1;
        format!(
            "ibdesk-{}-{}-{}",
            self.env.client_id,
            chrono::Utc::now().timestamp_millis(),
            self.next_sequence
        )
    }

    /// Walks the confirmation prompts the gateway raises for a new order until it
    /// reports an order id.
    async fn settle_order_reply(
        &mut self,
        mut reply: OrderReply,
    ) -> Result<(i64, Vec<LogEntry>), GatewayError> {
        let action = "Submit order";
        let mut prompts = Vec::new();

        for _ in 0..=MAX_REPLY_CONFIRMATIONS {
            let items = match reply {
                OrderReply::Error { error } => return Err(GatewayError::OrderRejected(error)),
                OrderReply::Items(items) => items,
            };

            let Some(item) = items.into_iter().next() else {
                return Err(GatewayError::parse(action, "empty order reply"));
            };

            match item {
                OrderReplyItem::Error { error } => {
                    return Err(GatewayError::OrderRejected(error));
                }
                OrderReplyItem::Placed {
                    order_id,
                    order_status,
                } => {
                    let order_id = order_id
                        .as_i64()
                        .ok_or_else(|| GatewayError::parse(action, "non-numeric order id"))?;
                    debug!(order_id, ?order_status, "Gateway accepted order ticket");
                    return Ok((order_id, prompts));
                }
                OrderReplyItem::Prompt { id, message } => {
                    for text in message {
                        info!(reply_id = %id, "Confirming order prompt: {text}");
                        prompts.push(LogEntry::new(text, ORDER_MESSAGE_CODE));
                    }

                    let response = Self::execute(
                        self.client
                            .post(self.url(&format!("iserver/reply/{id}")))
                            .json(&ReplyConfirmation { confirmed: true }),
                        action,
                    )
                    .await?;
                    reply = Self::read_json(response, action).await?;
                }
            }
        }

        Err(GatewayError::OrderRejected(format!(
            "order still awaiting confirmation after {MAX_REPLY_CONFIRMATIONS} prompts"
        )))
    }
}

fn parse_status(raw: Option<&str>) -> Option<GatewayOrderStatus> {
    let raw = raw?;
    match raw.parse() {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("Ignoring unrecognised order status from gateway: {e}");
            None
        }
    }
}

fn parse_side(raw: &str) -> Option<Direction> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "B" | "BUY" => Some(Direction::Buy),
        "S" | "SELL" | "SSHORT" => Some(Direction::Sell),
        _ => None,
    }
}

#[async_trait]
impl Gateway for ClientPortalGateway {
    type Config = GatewayEnv;

    async fn connect(env: Self::Config) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(env.accept_invalid_certs)
            .build()
            .map_err(|e| env.refused(e))?;

        let mut session = Self {
            client,
            account_id: String::new(),
            next_sequence: 0,
            diagnostics: BTreeMap::new(),
            env,
        };

        let status: AuthStatus = session
            .get_json("iserver/auth/status", "Check auth status")
            .await
            .map_err(|e| session.env.refused(e))?;

        if !status.authenticated || !status.connected || status.competing {
            let reason = status.message.filter(|m| !m.is_empty()).unwrap_or_else(|| {
                format!(
                    "authenticated={}, connected={}, competing={}",
                    status.authenticated, status.connected, status.competing
                )
            });
            return Err(session.env.refused(reason));
        }

        let accounts: Accounts = session
            .get_json("iserver/accounts", "List accounts")
            .await
            .map_err(|e| session.env.refused(e))?;

        session.account_id = match session.env.account_id.clone() {
            Some(account_id) if accounts.accounts.contains(&account_id) => account_id,
            Some(account_id) => {
                return Err(session.env.refused(format!(
                    "account {account_id} is not available on this gateway"
                )));
            }
            None => accounts
                .selected_account
                .or_else(|| accounts.accounts.into_iter().next())
                .ok_or_else(|| session.env.refused("no accounts available"))?,
        };

        info!(
            host = %session.env.host,
            port = session.env.port,
            client_id = session.env.client_id,
            account_id = %session.account_id,
            "Connected to Client Portal gateway"
        );

        Ok(session)
    }

    async fn resolve_instrument(&mut self, symbol: &Symbol) -> Result<Instrument, GatewayError> {
        let response = Self::execute(
            self.client
                .get(self.url("iserver/secdef/search"))
                .query(&[("symbol", symbol.0.as_str())]),
            "Search contract",
        )
        .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::InstrumentNotFound {
                symbol: symbol.to_string(),
            });
        }

        let matches: Vec<SecdefMatch> = Self::read_json(response, "Search contract").await?;

        let found = matches
            .iter()
            .filter(|m| {
                m.symbol
                    .as_deref()
                    .is_none_or(|s| s.eq_ignore_ascii_case(&symbol.0))
            })
            .find_map(|m| m.conid.as_i64().map(|conid| (conid, m)));

        let Some((conid, matched)) = found else {
            return Err(GatewayError::InstrumentNotFound {
                symbol: symbol.to_string(),
            });
        };

        debug!(
            %symbol,
            conid,
            description = matched.description.as_deref().unwrap_or_default(),
            "Resolved contract"
        );

        Ok(Instrument::us_stock(symbol.clone(), conid))
    }

    async fn submit(
        &mut self,
        instrument: &Instrument,
        spec: &OrderSpec,
    ) -> Result<SubmissionHandle, GatewayError> {
        let (order_type, price) = match spec.kind {
            OrderKind::Market => ("MKT", None),
            OrderKind::Limit { price } => ("LMT", Some(wire_price(price)?)),
        };

        let ticket = OrderTicket {
            acct_id: self.account_id.clone(),
            conid: instrument.contract_id,
            client_order_id: self.next_client_order_id(),
            order_type,
            side: spec.direction.as_str(),
            quantity: spec.shares.0,
            price,
            tif: "DAY",
            outside_rth: spec.outside_rth,
        };

        info!(
            symbol = %instrument.symbol,
            direction = %spec.direction,
            shares = spec.shares.0,
            order_type,
            client_order_id = %ticket.client_order_id,
            "Transmitting order"
        );

        let response = Self::execute(
            self.client
                .post(self.url(&format!("iserver/account/{}/orders", self.account_id)))
                .json(&OrdersRequest {
                    orders: vec![ticket],
                }),
            "Submit order",
        )
        .await?;
        let reply: OrderReply = Self::read_json(response, "Submit order").await?;

        let (order_id, prompts) = self.settle_order_reply(reply).await?;
        self.track(order_id, prompts);

        Ok(SubmissionHandle {
            order_id,
            symbol: instrument.symbol.clone(),
        })
    }

    async fn poll_status(
        &mut self,
        handle: &SubmissionHandle,
    ) -> Result<StatusSnapshot, GatewayError> {
        let action = "Poll order status";
        let response = Self::execute(
            self.client.get(self.url(&format!(
                "iserver/account/order/status/{}",
                handle.order_id
            ))),
            action,
        )
        .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::OrderNotFound {
                order_id: handle.order_id,
            });
        }

        let status: OrderStatusResponse = Self::read_json(response, action).await?;
        if status.order_id.as_i64() != Some(handle.order_id) {
            warn!(
                expected = handle.order_id,
                received = ?status.order_id,
                "Gateway answered a status poll for a different order id"
            );
        }

        let mut log = self.diagnostics.remove(&handle.order_id).unwrap_or_default();
        if let Some(reason) = status.reject_reason.filter(|r| !r.trim().is_empty()) {
            if !log.iter().any(|entry| entry.message == reason) {
                log.push(LogEntry::new(reason, ORDER_REJECTED_CODE));
            }
        }

        let order_status = parse_status(status.order_status.as_deref());
        let settled = order_status.is_some_and(|s| s.is_accepted() || s.is_rejected());
        if !settled {
            self.track(handle.order_id, log.clone());
        }

        let filled = status.cum_fill.unwrap_or_default();
        let total = status.total_size.unwrap_or_default();

        Ok(StatusSnapshot {
            order_id: handle.order_id,
            status: order_status,
            filled,
            remaining: (total - filled).max(Decimal::ZERO),
            avg_fill_price: status.average_price.filter(|p| !p.is_zero()),
            log,
        })
    }

    async fn positions(&mut self) -> Result<Vec<PositionSnapshot>, GatewayError> {
        let positions: Vec<PortfolioPosition> = self
            .get_json(
                &format!("portfolio/{}/positions/0", self.account_id),
                "List positions",
            )
            .await?;

        Ok(positions
            .into_iter()
            .filter(|p| !p.position.is_zero())
            .filter_map(|p| {
                let conid = p.conid.as_i64()?;
                let ticker = p.ticker.or(p.contract_desc)?;
                let mut instrument = Instrument::us_stock(Symbol(ticker), conid);
                if let Some(currency) = p.currency {
                    instrument.currency = currency;
                }
                if let Some(exchange) = p.listing_exchange {
                    instrument.exchange = exchange;
                }
                Some(PositionSnapshot {
                    instrument,
                    quantity: p.position,
                    avg_cost: p.avg_cost,
                })
            })
            .collect())
    }

    async fn price_of(&mut self, instrument: &Instrument) -> Result<Decimal, GatewayError> {
        let response = Self::execute(
            self.client
                .get(self.url("iserver/marketdata/snapshot"))
                .query(&[
                    ("conids", instrument.contract_id.to_string()),
                    ("fields", "31".to_string()),
                ]),
            "Market data snapshot",
        )
        .await?;
        let snapshots: Vec<MarketDataSnapshot> =
            Self::read_json(response, "Market data snapshot").await?;

        Ok(snapshots
            .first()
            .and_then(|s| s.last.as_deref())
            .and_then(parse_last_price)
            .filter(|price| *price > Decimal::ZERO)
            .unwrap_or(Decimal::ZERO))
    }

    async fn account_summary(&mut self) -> Result<AccountSummary, GatewayError> {
        let summary: PortfolioSummary = self
            .get_json(
                &format!("portfolio/{}/summary", self.account_id),
                "Account summary",
            )
            .await?;

        let amount = |value: Option<wire::SummaryValue>| {
            value.and_then(|v| v.amount).unwrap_or_default()
        };

        Ok(AccountSummary {
            account_id: self.account_id.clone(),
            net_liquidation: amount(summary.netliquidation),
            buying_power: amount(summary.buyingpower),
            cash_balance: amount(summary.totalcashvalue),
        })
    }

    async fn recent_orders(&mut self, limit: usize) -> Result<Vec<OrderSnapshot>, GatewayError> {
        let live: LiveOrders = self
            .get_json("iserver/account/orders", "List orders")
            .await?;

        let mut orders: Vec<_> = live
            .orders
            .into_iter()
            .filter_map(|order| {
                let order_id = order.order_id.as_i64()?;
                let direction = parse_side(&order.side)?;
                let filled = order.filled_quantity.unwrap_or_default();
                let quantity = order
                    .total_size
                    .unwrap_or_else(|| filled + order.remaining_quantity.unwrap_or_default());
                Some((
                    order.last_execution_time.unwrap_or_default(),
                    OrderSnapshot {
                        order_id,
                        symbol: Symbol(order.ticker.unwrap_or_default()),
                        direction,
                        quantity,
                        limit_price: order.price,
                        status: parse_status(order.status.as_deref()),
                        filled,
                        remaining: order.remaining_quantity.unwrap_or(quantity - filled),
                        avg_fill_price: order.avg_price,
                    },
                ))
            })
            .collect();

        orders.sort_by(|(a_time, a), (b_time, b)| {
            b_time.cmp(a_time).then(b.order_id.cmp(&a.order_id))
        });

        Ok(orders
            .into_iter()
            .take(limit)
            .map(|(_, order)| order)
            .collect())
    }

    async fn disconnect(self) -> Result<(), GatewayError> {
        // The gateway keeps its brokerage login; only this session's state is dropped.
        info!(
            account_id = %self.account_id,
            client_id = self.env.client_id,
            "Closing Client Portal session"
        );
        Ok(())
    }
}

fn wire_price(price: Decimal) -> Result<f64, GatewayError> {
    let exact = price.normalize().mantissa().abs() <= MAX_EXACT_PRICE_MANTISSA;

    match price.to_f64() {
        Some(value) if exact => Ok(value),
        _ => Err(GatewayError::request(
            "Submit order",
            format!("limit price {price} cannot be sent to the gateway exactly"),
        )),
    }
}
