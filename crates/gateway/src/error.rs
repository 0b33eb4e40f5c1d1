use thiserror::Error;

/// Failures reported by a gateway session.
///
/// Cloneable so that a failure can be fanned out to every request still waiting on a
/// session that has died.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection to gateway at {host}:{port} refused for client id {client_id}: {reason}")]
    ConnectionRefused {
        host: String,
        port: u16,
        client_id: i32,
        reason: String,
    },
    #[error("Connection to gateway lost: {0}")]
    ConnectionLost(String),
    #[error("Instrument not found for symbol {symbol}")]
    InstrumentNotFound { symbol: String },
    #[error("Order {order_id} not known to the gateway")]
    OrderNotFound { order_id: i64 },
    #[error("{action} failed: {message}")]
    Request { action: String, message: String },
    #[error("Order rejected by gateway: {0}")]
    OrderRejected(String),
    #[error("Failed to parse gateway response for {action}: {message}")]
    ResponseParse { action: String, message: String },
}

impl GatewayError {
    /// The session is dead once this is reported.
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }

    pub const fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. })
    }

    pub(crate) fn request(action: impl Into<String>, message: impl ToString) -> Self {
        Self::Request {
            action: action.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn parse(action: impl Into<String>, message: impl ToString) -> Self {
        Self::ResponseParse {
            action: action.into(),
            message: message.to_string(),
        }
    }
}
