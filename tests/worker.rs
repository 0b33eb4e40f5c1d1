use ibdesk::order::FailureKind;
use ibdesk::{
    OrderQueue, OrderRequest, OrderStatus, OrderType, PlaceOrder, SubmitError, WorkerConfig,
    WorkerError, WorkerHandle, spawn_worker,
};
use ibdesk_gateway::{
    Direction, GatewayCall, GatewayError, GatewayOrderStatus, GatewayScript, OrderScript,
    ScriptedGateway, Symbol,
};
use std::time::Duration;
use tokio::time::Instant;

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

async fn start(script: &GatewayScript) -> (OrderQueue, WorkerHandle) {
    spawn_worker::<ScriptedGateway>(script.clone(), WorkerConfig::default())
        .await
        .unwrap()
}

fn polls_of(calls: &[GatewayCall], order_id: i64) -> Vec<u32> {
    calls
        .iter()
        .filter_map(|call| match call {
            GatewayCall::Poll { order_id: id, tick } if *id == order_id => Some(*tick),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_order_accepted_on_second_poll() {
    let script = GatewayScript::new()
        .with_order(OrderScript::accepted_at(2, GatewayOrderStatus::Submitted));
    let (queue, handle) = start(&script).await;

    let started = Instant::now();
    let result = queue.submit(market("AAPL", 15)).await.unwrap();

    assert!(result.success());
    assert_eq!(result.status(), OrderStatus::Submitted);
    assert_eq!(result.order_id(), Some(1));
    assert_eq!(result.error_message(), None);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(polls_of(&script.calls(), 1), vec![1, 2]);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_limit_order_without_price_never_reaches_gateway() {
    let script = GatewayScript::new();
    let (queue, handle) = start(&script).await;

    let order = PlaceOrder {
        symbol: "AAPL".to_string(),
        side: Direction::Sell,
        quantity: 5,
        order_type: OrderType::Limit,
        limit_price: None,
        timeout_seconds: Some(15),
    };

    assert!(matches!(
        queue.place_order(&order).await,
        Err(SubmitError::Validation(_))
    ));
    assert_eq!(script.calls(), vec![GatewayCall::Connect]);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_order_times_out_and_is_left_live() {
    let script = GatewayScript::new().with_order(OrderScript::pending_forever());
    let (queue, handle) = start(&script).await;

    let started = Instant::now();
    let result = queue.submit(market("AAPL", 5)).await.unwrap();

    assert!(!result.success());
    assert_eq!(result.status(), OrderStatus::TimedOut);
    assert_eq!(result.failure(), Some(FailureKind::TimedOut));
    assert_eq!(result.order_id(), Some(1));
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(polls_of(&script.calls(), 1), vec![1, 2, 3, 4, 5]);

    // Nothing after the last poll: the order was not cancelled.
    assert_eq!(
        script.calls().last(),
        Some(&GatewayCall::Poll {
            order_id: 1,
            tick: 5
        })
    );

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_order_is_reported_with_message() {
    let script = GatewayScript::new()
        .with_order(OrderScript::accepted_at(1, GatewayOrderStatus::Cancelled));
    let (queue, handle) = start(&script).await;

    let result = queue.submit(market("AAPL", 15)).await.unwrap();

    assert!(!result.success());
    assert_eq!(result.status(), OrderStatus::Cancelled);
    assert_eq!(result.failure(), Some(FailureKind::Rejected));
    assert_eq!(
        result.error_message(),
        Some("Order Cancelled by gateway")
    );

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_orders_are_processed_in_arrival_order() {
    let script = GatewayScript::new()
        .with_order(OrderScript::accepted_at(3, GatewayOrderStatus::Filled))
        .with_order(OrderScript::accepted_at(1, GatewayOrderStatus::Submitted));
    let (queue, handle) = start(&script).await;

    let first = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(market("AAPL", 15)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(market("MSFT", 15)).await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.status(), OrderStatus::Filled);
    assert_eq!(first.order_id(), Some(1));
    assert_eq!(second.status(), OrderStatus::Submitted);
    assert_eq!(second.order_id(), Some(2));

    let calls = script.calls();
    let last_first_poll = calls
        .iter()
        .rposition(|call| matches!(call, GatewayCall::Poll { order_id: 1, .. }))
        .unwrap();
    let second_resolve = calls
        .iter()
        .position(|call| *call == GatewayCall::Resolve(Symbol("MSFT".to_string())))
        .unwrap();
    assert!(last_first_poll < second_resolve);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_session_never_sees_concurrent_calls() {
    let script = GatewayScript::new();
    let (queue, handle) = start(&script).await;

    let callers: Vec<_> = (0..8)
        .map(|i| {
            let queue = queue.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    assert!(queue.submit(market("AAPL", 15)).await.unwrap().success());
                } else {
                    assert!(queue.positions().await.unwrap().is_empty());
                }
            })
        })
        .collect();

    for caller in callers {
        caller.await.unwrap();
    }

    assert_eq!(script.max_concurrent_calls(), 1);
    assert_eq!(script.submitted_orders(), vec![1, 2, 3, 4]);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_fails_queued_orders() {
    let script = GatewayScript::new().with_order(
        OrderScript::pending_forever()
            .failing_poll_at(2, GatewayError::ConnectionLost("socket closed".to_string())),
    );
    let (queue, mut handle) = start(&script).await;

    let first = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(market("AAPL", 15)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(market("MSFT", 15)).await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    for result in [&first, &second] {
        assert_eq!(result.status(), OrderStatus::Error);
        assert_eq!(result.error_message(), Some("connection lost"));
        assert_eq!(result.failure(), Some(FailureKind::ConnectionLost));
    }
    assert_eq!(first.order_id(), Some(1));
    assert_eq!(second.order_id(), None);
    assert_eq!(script.submitted_orders(), vec![1]);

    assert!(matches!(
        handle.exited().await,
        Err(WorkerError::ConnectionLost(_))
    ));
    assert!(script.is_disconnected());
    assert!(matches!(
        queue.submit(market("AAPL", 15)).await,
        Err(SubmitError::WorkerUnavailable)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_finishes_in_flight_order_and_drains_queue() {
    let script = GatewayScript::new()
        .with_order(OrderScript::accepted_at(3, GatewayOrderStatus::Filled));
    let (queue, handle) = start(&script).await;

    let first = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(market("AAPL", 15)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(market("MSFT", 15)).await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    handle.stop().await.unwrap();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.status(), OrderStatus::Filled);
    assert_eq!(second.status(), OrderStatus::Error);
    assert_eq!(second.error_message(), Some("worker stopped"));
    assert_eq!(second.failure(), Some(FailureKind::WorkerStopped));
    assert_eq!(script.submitted_orders(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_symbol_is_reported() {
    let script = GatewayScript::new().with_unknown_symbol("ZZZZ");
    let (queue, handle) = start(&script).await;

    let result = queue.submit(market("ZZZZ", 15)).await.unwrap();

    assert_eq!(result.status(), OrderStatus::Error);
    assert_eq!(result.failure(), Some(FailureKind::InstrumentNotFound));
    assert_eq!(
        result.error_message(),
        Some("Instrument not found for symbol ZZZZ")
    );
    assert!(script.submitted_orders().is_empty());
    assert!(queue.is_running());

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_share_class_symbol_reaches_gateway() {
    let script = GatewayScript::new()
        .with_order(OrderScript::accepted_at(1, GatewayOrderStatus::Submitted));
    let (queue, handle) = start(&script).await;

    let result = queue.submit(market("brk b", 15)).await.unwrap();

    assert!(result.success());
    assert!(
        script
            .calls()
            .contains(&GatewayCall::Resolve(Symbol("BRK B".to_string())))
    );

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_submit_rejection_is_reported() {
    let script = GatewayScript::new().with_order(OrderScript::failing_submit(
        GatewayError::OrderRejected("No trading permissions for this account".to_string()),
    ));
    let (queue, handle) = start(&script).await;

    let result = queue.submit(market("AAPL", 15)).await.unwrap();

    assert_eq!(result.status(), OrderStatus::Error);
    assert_eq!(result.failure(), Some(FailureKind::Rejected));
    assert_eq!(
        result.error_message(),
        Some("Order rejected by gateway: No trading permissions for this account")
    );

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_refused_connection_is_retried_then_given_up() {
    let script = GatewayScript::new().refusing_connections(5, "client id 1 already in use");

    let err = spawn_worker::<ScriptedGateway>(
        script.clone(),
        WorkerConfig {
            connect_attempts: 4,
            ..WorkerConfig::default()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, WorkerError::Connect(ref e) if e.is_connection_refused()));
    assert!(err.to_string().contains("client id 1 already in use"));
    assert_eq!(script.connect_attempts(), 4);
}
