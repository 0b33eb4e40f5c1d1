use chrono::{DateTime, Utc};
use ibdesk_gateway::{AccountSummary, OrderSnapshot};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Route, State, get, post, routes};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, SubmitError};
use crate::order::{OrderResult, Outcome, PlaceOrder};
use crate::queue::OrderQueue;
use crate::valuation::Position;

const DEFAULT_RECENT_ORDERS: usize = 10;
const MAX_RECENT_ORDERS: usize = 100;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub worker_running: bool,
    pub timestamp: DateTime<Utc>,
}

#[get("/health")]
pub fn health(queue: &State<OrderQueue>) -> Json<HealthResponse> {
    let worker_running = queue.is_running();

    Json(HealthResponse {
        status: if worker_running { "healthy" } else { "degraded" }.to_string(),
        worker_running,
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlaceOrderResponse {
    Accepted(OrderResult),
    Rejected(OrderResult),
    /// The order may still be live; reconcile through `/orders` or `/positions`.
    TimedOut(OrderResult),
    Error(OrderResult),
    Invalid { error: String },
    Unavailable { error: String },
}

impl From<OrderResult> for PlaceOrderResponse {
    fn from(result: OrderResult) -> Self {
        match result.outcome() {
            Outcome::Accepted => Self::Accepted(result),
            Outcome::Rejected => Self::Rejected(result),
            Outcome::TimedOut => Self::TimedOut(result),
            Outcome::Error => Self::Error(result),
        }
    }
}

#[post("/orders", format = "json", data = "<order>")]
pub async fn place_order(
    order: Json<PlaceOrder>,
    queue: &State<OrderQueue>,
) -> (Status, Json<PlaceOrderResponse>) {
    match queue.place_order(&order).await {
        Ok(result) => (Status::Ok, Json(result.into())),
        Err(SubmitError::Validation(e)) => (
            Status::UnprocessableEntity,
            Json(PlaceOrderResponse::Invalid {
                error: e.to_string(),
            }),
        ),
        Err(e @ SubmitError::WorkerUnavailable) => (
            Status::ServiceUnavailable,
            Json(PlaceOrderResponse::Unavailable {
                error: e.to_string(),
            }),
        ),
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type QueryResponse<T> = Result<Json<T>, (Status, Json<ErrorResponse>)>;

fn query_failed(error: &QueryError) -> (Status, Json<ErrorResponse>) {
    let status = match error {
        QueryError::WorkerUnavailable => Status::ServiceUnavailable,
        QueryError::Gateway(_) => Status::BadGateway,
        QueryError::TimedOut(_) => Status::GatewayTimeout,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

#[get("/positions")]
pub async fn positions(queue: &State<OrderQueue>) -> QueryResponse<Vec<Position>> {
    queue
        .positions()
        .await
        .map(Json)
        .map_err(|e| query_failed(&e))
}

#[get("/orders?<limit>")]
pub async fn recent_orders(
    limit: Option<usize>,
    queue: &State<OrderQueue>,
) -> QueryResponse<Vec<OrderSnapshot>> {
    let limit = limit
        .unwrap_or(DEFAULT_RECENT_ORDERS)
        .min(MAX_RECENT_ORDERS);

    queue
        .recent_orders(limit)
        .await
        .map(Json)
        .map_err(|e| query_failed(&e))
}

#[get("/account")]
pub async fn account(queue: &State<OrderQueue>) -> QueryResponse<AccountSummary> {
    queue
        .account_summary()
        .await
        .map(Json)
        .map_err(|e| query_failed(&e))
}

pub fn routes() -> Vec<Route> {
    routes![health, place_order, positions, recent_orders, account]
}
