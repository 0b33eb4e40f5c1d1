//! The order worker: a single task that owns the gateway session.
//!
//! The session is opened inside the worker task and never leaves it. Commands arrive
//! through the [`OrderQueue`] and are handled strictly one after another, so at most
//! one gateway call is ever in flight. Per order the worker moves through
//! `Created -> ContractResolved -> Submitted` and then polls until the order is
//! accepted, rejected, or its timeout elapses.

use backon::{ConstantBuilder, Retryable};
use ibdesk_gateway::{
    Gateway, GatewayError, Instrument, PositionSnapshot, Shares, StatusSnapshot,
};
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{QueryError, WorkerError};
use crate::order::{FailureKind, OrderRequest, OrderResult};
use crate::queue::{Command, OrderQueue, Reply};
use crate::valuation::{Position, valuate};

mod polling;

use polling::{Verdict, poll_until_settled};

const CONNECTION_LOST: &str = "connection lost";
const WORKER_STOPPED: &str = "worker stopped";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    /// Extra time a caller waits beyond the order's own timeout.
    pub submit_grace: Duration,
    pub queue_capacity: usize,
    pub default_order_timeout: Duration,
    pub query_timeout: Duration,
    pub outside_rth: bool,
    /// Total attempts at the initial connection, including the first.
    pub connect_attempts: usize,
    pub connect_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            submit_grace: Duration::from_secs(5),
            queue_capacity: 32,
            default_order_timeout: Duration::from_secs(15),
            query_timeout: Duration::from_secs(10),
            outside_rth: true,
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Owner-side handle of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), WorkerError>>,
}

impl WorkerHandle {
    /// Asks the worker to stop after the command it is processing and waits for it.
    /// Queued commands are answered with a "worker stopped" error.
    pub async fn stop(self) -> Result<(), WorkerError> {
        if self.shutdown_tx.send(true).is_err() {
            debug!("Order worker already gone when asked to stop");
        }
        self.task.await?
    }

    /// Resolves when the worker exits on its own. Must not be awaited again once it
    /// has resolved.
    pub async fn exited(&mut self) -> Result<(), WorkerError> {
        (&mut self.task).await?
    }
}

/// Connects to the gateway inside a new worker task and starts serving commands.
///
/// Returns once the session is up. A refused connection is retried
/// `connect_attempts - 1` times; any other connection failure is returned directly.
pub async fn spawn_worker<G: Gateway>(
    gateway_config: G::Config,
    config: WorkerConfig,
) -> Result<(OrderQueue, WorkerHandle), WorkerError> {
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let queue = OrderQueue::new(sender, &config);

    let task = tokio::spawn(async move {
        let gateway = match connect_with_retry::<G>(gateway_config, &config).await {
            Ok(gateway) => {
                if ready_tx.send(Ok(())).is_err() {
                    warn!("Nobody waiting for order worker startup");
                }
                gateway
            }
            Err(e) => {
                if ready_tx.send(Err(e.clone())).is_err() {
                    warn!("Nobody waiting for order worker startup");
                }
                return Err(WorkerError::Connect(e));
            }
        };

        OrderWorker {
            gateway,
            receiver,
            shutdown_rx,
            config,
        }
        .run()
        .await
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok((queue, WorkerHandle { shutdown_tx, task })),
        Ok(Err(e)) => {
            if let Err(join_error) = task.await {
                error!("Order worker task failed after connect error: {join_error}");
            }
            Err(WorkerError::Connect(e))
        }
        Err(_) => match task.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => Err(WorkerError::StartupAborted),
            Err(join_error) => Err(WorkerError::Task(join_error)),
        },
    }
}

async fn connect_with_retry<G: Gateway>(
    gateway_config: G::Config,
    config: &WorkerConfig,
) -> Result<G, GatewayError> {
    let connect = || G::connect(gateway_config.clone());

    connect
        .retry(
            ConstantBuilder::default()
                .with_delay(config.connect_retry_delay)
                .with_max_times(config.connect_attempts.saturating_sub(1)),
        )
        .when(GatewayError::is_connection_refused)
        .notify(|e: &GatewayError, delay: Duration| {
            warn!("Gateway connection refused, retrying in {delay:?}: {e}");
        })
        .await
}

#[derive(Debug)]
struct PendingOrder {
    request: OrderRequest,
    respond: oneshot::Sender<OrderResult>,
    /// Set once the gateway has taken the order.
    submitted_at: Option<Instant>,
}

/// The connection died while handling a command.
#[derive(Debug)]
struct ConnectionLost(GatewayError);

enum Exit {
    Stopped,
    ConnectionLost(GatewayError),
}

struct OrderWorker<G> {
    gateway: G,
    receiver: mpsc::Receiver<Command>,
    shutdown_rx: watch::Receiver<bool>,
    config: WorkerConfig,
}

impl<G: Gateway> OrderWorker<G> {
    async fn run(mut self) -> Result<(), WorkerError> {
        info!(
            poll_interval = ?self.config.poll_interval,
            queue_capacity = self.config.queue_capacity,
            "Order worker started"
        );

        let exit = loop {
            let command = tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Received shutdown signal, stopping order worker");
                        break Exit::Stopped;
                    }
                    continue;
                }

                command = self.receiver.recv() => command,
            };

            let Some(command) = command else {
                info!("All order queue handles dropped, stopping order worker");
                break Exit::Stopped;
            };

            if let Err(ConnectionLost(e)) = self.handle(command).await {
                error!("Gateway connection lost, stopping order worker: {e}");
                break Exit::ConnectionLost(e);
            }
        };

        let (failure, reason) = match &exit {
            Exit::Stopped => (FailureKind::WorkerStopped, WORKER_STOPPED),
            Exit::ConnectionLost(_) => (FailureKind::ConnectionLost, CONNECTION_LOST),
        };
        self.drain(failure, reason);

        if let Err(e) = self.gateway.disconnect().await {
            warn!("Failed to disconnect gateway session cleanly: {e}");
        }

        match exit {
            Exit::Stopped => {
                info!("Order worker stopped");
                Ok(())
            }
            Exit::ConnectionLost(e) => Err(WorkerError::ConnectionLost(e)),
        }
    }

    /// Closes the queue and answers everything still in it.
    fn drain(&mut self, failure: FailureKind, reason: &str) {
        self.receiver.close();

        let mut drained = 0_usize;
        while let Ok(command) = self.receiver.try_recv() {
            drained += 1;
            match command {
                Command::PlaceOrder { request, respond } => {
                    let result = OrderResult::error(None, failure, reason, request.shares());
                    if respond.send(result).is_err() {
                        debug!(symbol = %request.symbol(), "Caller gone before drain");
                    }
                }
                Command::Positions { respond } => reply_unavailable(respond, failure),
                Command::AccountSummary { respond } => reply_unavailable(respond, failure),
                Command::RecentOrders { respond, .. } => reply_unavailable(respond, failure),
            }
        }

        if drained > 0 {
            warn!("Drained {drained} queued commands: {reason}");
        }
    }

    async fn handle(&mut self, command: Command) -> Result<(), ConnectionLost> {
        match command {
            Command::PlaceOrder { request, respond } => {
                let mut pending = PendingOrder {
                    request,
                    respond,
                    submitted_at: None,
                };
                let (result, lost) = self.execute(&mut pending).await;

                info!(
                    symbol = %pending.request.symbol(),
                    order_id = ?result.order_id(),
                    status = %result.status(),
                    success = result.success(),
                    elapsed = ?pending.submitted_at.map(|at| at.elapsed()),
                    "Order finished"
                );

                if pending.respond.send(result).is_err() {
                    warn!(
                        symbol = %pending.request.symbol(),
                        "Caller stopped waiting before the order finished; reconcile via recent orders"
                    );
                }

                lost.map_or(Ok(()), |e| Err(ConnectionLost(e)))
            }
            Command::Positions { respond } => {
                let result = self.valued_positions().await;
                answer(respond, result)
            }
            Command::AccountSummary { respond } => {
                let result = self.gateway.account_summary().await;
                answer(respond, result)
            }
            Command::RecentOrders { limit, respond } => {
                let result = self.gateway.recent_orders(limit).await;
                answer(respond, result)
            }
        }
    }

    /// Runs one order to its result. The second value is set when the gateway
    /// connection died on the way.
    async fn execute(&mut self, pending: &mut PendingOrder) -> (OrderResult, Option<GatewayError>) {
        let request = &pending.request;
        let shares = request.shares();
        let symbol = request.symbol().clone();
        info!(
            %symbol,
            direction = %request.direction(),
            shares = shares.0,
            kind = ?request.kind(),
            timeout = ?request.timeout(),
            "Order created"
        );

        let instrument = match self.gateway.resolve_instrument(&symbol).await {
            Ok(instrument) => instrument,
            Err(e) => return fault(None, e, shares, None),
        };
        debug!(%symbol, contract_id = instrument.contract_id, "Contract resolved");

        let spec = request.to_order_spec(self.config.outside_rth);
        let handle = match self.gateway.submit(&instrument, &spec).await {
            Ok(handle) => handle,
            Err(e) => return fault(None, e, shares, None),
        };
        let submitted_at = Instant::now();
        pending.submitted_at = Some(submitted_at);
        info!(%symbol, order_id = handle.order_id, "Order submitted");

        let timeout = pending.request.timeout();
        let verdict = poll_until_settled(
            &mut self.gateway,
            &handle,
            submitted_at,
            timeout,
            self.config.poll_interval,
        )
        .await;

        match verdict {
            Verdict::Accepted { status, snapshot } => {
                debug!(order_id = handle.order_id, %status, "Order accepted");
                (OrderResult::settled(&snapshot, None), None)
            }
            Verdict::Rejected { status, snapshot } => {
                let message = snapshot.most_severe_entry().map_or_else(
                    || format!("Order {status} by gateway"),
                    |entry| format!("Order {status}: {entry}"),
                );
                warn!(order_id = handle.order_id, %status, "{message}");
                (OrderResult::settled(&snapshot, Some(message)), None)
            }
            Verdict::TimedOut { ticks, last } => {
                let message = format!(
                    "No accepted or rejected status after {}s ({ticks} polls); order {} left live at the gateway",
                    timeout.as_secs(),
                    handle.order_id
                );
                warn!(order_id = handle.order_id, "{message}");
                (
                    OrderResult::timed_out(handle.order_id, last.as_ref(), shares, message),
                    None,
                )
            }
            Verdict::Faulted { error, last } => {
                let context = last
                    .as_ref()
                    .and_then(StatusSnapshot::most_severe_entry)
                    .map(ToString::to_string);
                fault(Some(handle.order_id), error, shares, context.as_deref())
            }
        }
    }

    async fn valued_positions(&mut self) -> Result<Vec<Position>, GatewayError> {
        let snapshots = self.gateway.positions().await?;
        let mut positions = Vec::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let price = self.live_price(&snapshot).await?;
            positions.push(valuate(&snapshot, price));
        }

        Ok(positions)
    }

    /// Zero when the gateway cannot price the instrument, so the valuer falls back to
    /// average cost.
    async fn live_price(&mut self, snapshot: &PositionSnapshot) -> Result<Decimal, GatewayError> {
        let instrument: &Instrument = &snapshot.instrument;
        match self.gateway.price_of(instrument).await {
            Ok(price) => Ok(price),
            Err(e) if e.is_connection_lost() => Err(e),
            Err(e) => {
                warn!(symbol = %instrument.symbol, "No live price, using average cost: {e}");
                Ok(Decimal::ZERO)
            }
        }
    }
}

/// Maps a gateway failure to an `Error` result carrying the failure's message, plus
/// the most severe gateway log entry seen before it when there is one.
fn fault(
    order_id: Option<i64>,
    error: GatewayError,
    shares: Shares,
    context: Option<&str>,
) -> (OrderResult, Option<GatewayError>) {
    let failure = match &error {
        GatewayError::InstrumentNotFound { .. } => FailureKind::InstrumentNotFound,
        GatewayError::ConnectionLost(_) | GatewayError::ConnectionRefused { .. } => {
            FailureKind::ConnectionLost
        }
        GatewayError::OrderRejected(_) => FailureKind::Rejected,
        GatewayError::OrderNotFound { .. }
        | GatewayError::Request { .. }
        | GatewayError::ResponseParse { .. } => FailureKind::Gateway,
    };

    if error.is_connection_lost() {
        return (
            OrderResult::error(order_id, failure, CONNECTION_LOST, shares),
            Some(error),
        );
    }

    warn!(?order_id, "Order failed: {error}");
    let message = context.map_or_else(
        || error.to_string(),
        |context| format!("{error}; gateway log: {context}"),
    );
    (OrderResult::error(order_id, failure, message, shares), None)
}

fn answer<T>(respond: Reply<T>, result: Result<T, GatewayError>) -> Result<(), ConnectionLost> {
    let lost = result
        .as_ref()
        .err()
        .filter(|e| e.is_connection_lost())
        .cloned();

    if let Err(e) = &result {
        warn!("Gateway query failed: {e}");
    }

    if respond.send(result.map_err(QueryError::Gateway)).is_err() {
        debug!("Query caller gone before answer");
    }

    lost.map_or(Ok(()), |e| Err(ConnectionLost(e)))
}

fn reply_unavailable<T>(respond: Reply<T>, failure: FailureKind) {
    let error = if failure == FailureKind::ConnectionLost {
        QueryError::Gateway(GatewayError::ConnectionLost(CONNECTION_LOST.to_string()))
    } else {
        QueryError::WorkerUnavailable
    };

    if respond.send(Err(error)).is_err() {
        debug!("Query caller gone before drain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderStatus, OrderType};
    use ibdesk_gateway::{
        Direction, GatewayCall, GatewayOrderStatus, GatewayScript, LogEntry, OrderScript,
        ScriptedGateway, Symbol,
    };
    use rust_decimal_macros::dec;

    fn market(symbol: &str, timeout_secs: u64) -> OrderRequest {
        OrderRequest::new(
            symbol,
            Direction::Buy,
            10,
            OrderType::Market,
            None,
            timeout_secs,
        )
        .unwrap()
    }

    async fn start(script: GatewayScript) -> (OrderQueue, WorkerHandle) {
        spawn_worker::<ScriptedGateway>(script, WorkerConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_fails_when_connection_refused_on_every_attempt() {
        let script = GatewayScript::new().refusing_connections(10, "client id 1 in use");

        let err = spawn_worker::<ScriptedGateway>(script.clone(), WorkerConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Connect(ref e) if e.is_connection_refused()));
        assert_eq!(script.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_retries_refused_connection() {
        let script = GatewayScript::new().refusing_connections(2, "gateway starting");

        let (queue, handle) = start(script.clone()).await;

        assert!(queue.is_running());
        assert_eq!(script.connect_attempts(), 3);
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_outside_rth_flag_reaches_gateway() {
        let script = GatewayScript::new();
        let (queue, handle) = spawn_worker::<ScriptedGateway>(
            script.clone(),
            WorkerConfig {
                outside_rth: false,
                ..WorkerConfig::default()
            },
        )
        .await
        .unwrap();

        queue.submit(market("AAPL", 15)).await.unwrap();

        assert!(!script.submitted_specs()[0].outside_rth);
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_message_uses_most_severe_log_entry() {
        let script = GatewayScript::new().with_order(
            OrderScript::accepted_at(1, GatewayOrderStatus::Cancelled)
                .with_log_entry(1, LogEntry::new("Market data farm connection is OK", 2104))
                .with_log_entry(1, LogEntry::new("Order rejected - reason: margin", 201)),
        );
        let (queue, handle) = start(script).await;

        let result = queue.submit(market("AAPL", 15)).await.unwrap();

        assert_eq!(result.status(), OrderStatus::Cancelled);
        assert_eq!(
            result.error_message(),
            Some("Order Cancelled: [201] Order rejected - reason: margin")
        );
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_gateway_fault_keeps_worker_running() {
        let script = GatewayScript::new()
            .with_order(OrderScript::failing_submit(GatewayError::Request {
                action: "Submit order".to_string(),
                message: "HTTP 500".to_string(),
            }))
            .with_order(OrderScript::accepted_at(1, GatewayOrderStatus::Filled));
        let (queue, handle) = start(script).await;

        let failed = queue.submit(market("AAPL", 15)).await.unwrap();
        assert_eq!(failed.status(), OrderStatus::Error);
        assert_eq!(failed.error_message(), Some("Submit order failed: HTTP 500"));
        assert_eq!(failed.failure(), Some(FailureKind::Gateway));

        let filled = queue.submit(market("AAPL", 15)).await.unwrap();
        assert_eq!(filled.status(), OrderStatus::Filled);
        assert!(queue.is_running());
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_fault_message_includes_gateway_log() {
        let script = GatewayScript::new().with_order(
            OrderScript::pending_forever()
                .with_log_entry(1, LogEntry::new("Order held: locating shares", 399))
                .failing_poll_at(2, GatewayError::OrderNotFound { order_id: 1 }),
        );
        let (queue, handle) = start(script).await;

        let result = queue.submit(market("AAPL", 15)).await.unwrap();

        assert_eq!(result.status(), OrderStatus::Error);
        assert_eq!(
            result.error_message(),
            Some("Order 1 not known to the gateway; gateway log: [399] Order held: locating shares")
        );
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_positions_are_valued_with_live_prices() {
        let script = GatewayScript::new()
            .with_position(PositionSnapshot {
                instrument: Instrument::us_stock(Symbol("AAPL".to_string()), 1),
                quantity: dec!(10),
                avg_cost: dec!(150),
            })
            .with_position(PositionSnapshot {
                instrument: Instrument::us_stock(Symbol("MSFT".to_string()), 2),
                quantity: dec!(2),
                avg_cost: dec!(400),
            })
            .with_price("AAPL", dec!(160));
        let (queue, handle) = start(script.clone()).await;

        let positions = queue.positions().await.unwrap();

        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].unrealized_pnl, dec!(100));
        assert!(positions[0].price_is_live);
        assert_eq!(positions[1].last_price, dec!(400));
        assert!(!positions[1].price_is_live);
        assert!(script.calls().contains(&GatewayCall::Price(Symbol("MSFT".to_string()))));
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_is_reported_without_stopping() {
        let script = GatewayScript::new().failing_queries(GatewayError::Request {
            action: "Account summary".to_string(),
            message: "HTTP 503".to_string(),
        });
        let (queue, handle) = start(script).await;

        assert!(matches!(
            queue.account_summary().await,
            Err(QueryError::Gateway(GatewayError::Request { .. }))
        ));
        assert!(queue.is_running());
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_connection_loss_stops_worker() {
        let script = GatewayScript::new()
            .failing_queries(GatewayError::ConnectionLost("socket closed".to_string()));
        let (queue, mut handle) = start(script.clone()).await;

        let err = queue.recent_orders(5).await.unwrap_err();
        assert!(matches!(err, QueryError::Gateway(ref e) if e.is_connection_lost()));

        assert!(matches!(
            handle.exited().await,
            Err(WorkerError::ConnectionLost(_))
        ));
        assert!(!queue.is_running());
        assert!(script.is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disconnects_session() {
        let script = GatewayScript::new();
        let (queue, handle) = start(script.clone()).await;

        handle.stop().await.unwrap();

        assert!(script.is_disconnected());
        assert!(!queue.is_running());
        assert!(matches!(
            queue.submit(market("AAPL", 15)).await,
            Err(crate::error::SubmitError::WorkerUnavailable)
        ));
    }
}
