//! The only way into the order worker.
//!
//! Every caller talks to the worker by sending a [`Command`] paired with its own
//! response channel. The channel is bounded and consumed by a single task, so commands
//! are processed one at a time in arrival order.

use ibdesk_gateway::{AccountSummary, OrderSnapshot};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{QueryError, SubmitError};
use crate::order::{FailureKind, OrderRequest, OrderResult, PlaceOrder};
use crate::valuation::Position;
use crate::worker::WorkerConfig;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, QueryError>>;

#[derive(Debug)]
pub(crate) enum Command {
    PlaceOrder {
        request: OrderRequest,
        respond: oneshot::Sender<OrderResult>,
    },
    Positions {
        respond: Reply<Vec<Position>>,
    },
    AccountSummary {
        respond: Reply<AccountSummary>,
    },
    RecentOrders {
        limit: usize,
        respond: Reply<Vec<OrderSnapshot>>,
    },
}

/// Cloneable handle for submitting orders and queries to the worker.
#[derive(Debug, Clone)]
pub struct OrderQueue {
    sender: mpsc::Sender<Command>,
    grace: Duration,
    query_timeout: Duration,
    default_timeout: Duration,
}

impl OrderQueue {
    pub(crate) fn new(sender: mpsc::Sender<Command>, config: &WorkerConfig) -> Self {
        Self {
            sender,
            grace: config.submit_grace,
            query_timeout: config.query_timeout,
            default_timeout: config.default_order_timeout,
        }
    }

    /// False once the worker has stopped accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Validates and submits an inbound order.
    pub async fn place_order(&self, order: &PlaceOrder) -> Result<OrderResult, SubmitError> {
        let request = order.validate(self.default_timeout)?;
        self.submit(request).await
    }

    /// Waits at most the request's timeout plus the grace period, covering both the
    /// time spent queued and the time spent processing. A `TimedOut` result from
    /// this wait says nothing about the order itself.
    pub async fn submit(&self, request: OrderRequest) -> Result<OrderResult, SubmitError> {
        if self.sender.is_closed() {
            return Err(SubmitError::WorkerUnavailable);
        }

        let wait = request.timeout().saturating_add(self.grace);
        let shares = request.shares();
        let symbol = request.symbol().clone();
        let (respond, response) = oneshot::channel();

        let exchange = async {
            self.sender
                .send(Command::PlaceOrder { request, respond })
                .await
                .map_err(|_| SubmitError::WorkerUnavailable)?;

            debug!(%symbol, "Order queued");

            Ok::<_, SubmitError>(response.await.unwrap_or_else(|_| {
                OrderResult::error(
                    None,
                    FailureKind::WorkerStopped,
                    "worker stopped",
                    shares,
                )
            }))
        };

        if let Ok(result) = timeout(wait, exchange).await {
            result
        } else {
            warn!(%symbol, ?wait, "Gave up waiting for order result");
            Ok(OrderResult::caller_timed_out(shares, wait))
        }
    }

    pub async fn positions(&self) -> Result<Vec<Position>, QueryError> {
        self.query(|respond| Command::Positions { respond }).await
    }

    pub async fn account_summary(&self) -> Result<AccountSummary, QueryError> {
        self.query(|respond| Command::AccountSummary { respond })
            .await
    }

    /// Most recent orders first.
    pub async fn recent_orders(&self, limit: usize) -> Result<Vec<OrderSnapshot>, QueryError> {
        self.query(|respond| Command::RecentOrders { limit, respond })
            .await
    }

    async fn query<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, QueryError> {
        if self.sender.is_closed() {
            return Err(QueryError::WorkerUnavailable);
        }

        let (respond, response) = oneshot::channel();

        let exchange = async {
            self.sender
                .send(command(respond))
                .await
                .map_err(|_| QueryError::WorkerUnavailable)?;

            response
                .await
                .map_err(|_| QueryError::WorkerUnavailable)?
        };

        timeout(self.query_timeout, exchange)
            .await
            .map_err(|_| QueryError::TimedOut(self.query_timeout))?
    }
}
