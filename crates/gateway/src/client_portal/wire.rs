//! Request and response bodies of the Client Portal Web API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ids arrive as JSON numbers from some endpoints and as strings from others.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum FlexibleId {
    Number(i64),
    Text(String),
}

impl FlexibleId {
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(id) => Some(*id),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub competing: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Accounts {
    #[serde(default)]
    pub accounts: Vec<String>,
    pub selected_account: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SecdefMatch {
    pub conid: FlexibleId,
    pub symbol: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OrdersRequest {
    pub orders: Vec<OrderTicket>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrderTicket {
    pub acct_id: String,
    pub conid: i64,
    #[serde(rename = "cOID")]
    pub client_order_id: String,
    pub order_type: &'static str,
    pub side: &'static str,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub tif: &'static str,
    #[serde(rename = "outsideRTH")]
    pub outside_rth: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReplyConfirmation {
    pub confirmed: bool,
}

/// Answer to an order submission or to a confirmed prompt.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OrderReply {
    Items(Vec<OrderReplyItem>),
    Error { error: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OrderReplyItem {
    Placed {
        order_id: FlexibleId,
        order_status: Option<String>,
    },
    Prompt {
        id: String,
        #[serde(default)]
        message: Vec<String>,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderStatusResponse {
    pub order_id: FlexibleId,
    pub order_status: Option<String>,
    pub total_size: Option<Decimal>,
    pub cum_fill: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PortfolioPosition {
    pub conid: FlexibleId,
    pub ticker: Option<String>,
    pub contract_desc: Option<String>,
    pub position: Decimal,
    pub avg_cost: Decimal,
    pub currency: Option<String>,
    pub listing_exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SummaryValue {
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortfolioSummary {
    pub netliquidation: Option<SummaryValue>,
    pub buyingpower: Option<SummaryValue>,
    pub totalcashvalue: Option<SummaryValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MarketDataSnapshot {
    /// Last price; may carry a `C` (prior close) or `H` (halted) prefix.
    #[serde(rename = "31")]
    pub last: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LiveOrders {
    #[serde(default)]
    pub orders: Vec<LiveOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveOrder {
    pub order_id: FlexibleId,
    pub ticker: Option<String>,
    pub side: String,
    pub total_size: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
    pub remaining_quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    pub status: Option<String>,
    #[serde(rename = "lastExecutionTime_r")]
    pub last_execution_time: Option<i64>,
}

/// Parses a field 31 value such as `"187.50"`, `"C187.50"` or `"H12.1"`.
pub(crate) fn parse_last_price(raw: &str) -> Option<Decimal> {
    raw.trim()
        .trim_start_matches(['C', 'H'])
        .parse::<Decimal>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_flexible_id_accepts_numbers_and_strings() {
        let number: FlexibleId = serde_json::from_str("265598").unwrap();
        let text: FlexibleId = serde_json::from_str("\"265598\"").unwrap();
        assert_eq!(number.as_i64(), Some(265_598));
        assert_eq!(text.as_i64(), Some(265_598));

        let garbage: FlexibleId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(garbage.as_i64(), None);
    }

    #[test]
    fn test_parse_last_price_strips_prefixes() {
        assert_eq!(parse_last_price("187.50"), Some(dec!(187.50)));
        assert_eq!(parse_last_price("C187.50"), Some(dec!(187.50)));
        assert_eq!(parse_last_price("H12.1"), Some(dec!(12.1)));
        assert_eq!(parse_last_price(""), None);
        assert_eq!(parse_last_price("N/A"), None);
    }

    #[test]
    fn test_order_reply_variants() {
        let placed: OrderReply =
            serde_json::from_str(r#"[{"order_id":"1234","order_status":"Submitted"}]"#).unwrap();
        assert!(matches!(
            placed,
            OrderReply::Items(ref items) if matches!(items[0], OrderReplyItem::Placed { .. })
        ));

        let prompt: OrderReply = serde_json::from_str(
            r#"[{"id":"a1b2","message":["You are about to submit a market order"]}]"#,
        )
        .unwrap();
        assert!(matches!(
            prompt,
            OrderReply::Items(ref items) if matches!(items[0], OrderReplyItem::Prompt { .. })
        ));

        let error: OrderReply =
            serde_json::from_str(r#"{"error":"No trading permissions"}"#).unwrap();
        assert!(matches!(error, OrderReply::Error { .. }));
    }

    #[test]
    fn test_order_ticket_serialization() {
        let ticket = OrderTicket {
            acct_id: "U1234567".to_string(),
            conid: 265_598,
            client_order_id: "ibdesk-1-1".to_string(),
            order_type: "LMT",
            side: "SELL",
            quantity: 5,
            price: Some(190.25),
            tif: "DAY",
            outside_rth: true,
        };

        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["acctId"], "U1234567");
        assert_eq!(json["cOID"], "ibdesk-1-1");
        assert_eq!(json["orderType"], "LMT");
        assert_eq!(json["outsideRTH"], true);
        assert_eq!(json["price"], 190.25);
    }

    #[test]
    fn test_order_status_accepts_string_numbers() {
        let response: OrderStatusResponse = serde_json::from_str(
            r#"{"order_id":1234,"order_status":"Filled","total_size":"10.0","cum_fill":"10.0","average_price":"187.5"}"#,
        )
        .unwrap();

        assert_eq!(response.order_id.as_i64(), Some(1234));
        assert_eq!(response.cum_fill, Some(dec!(10)));
        assert_eq!(response.average_price, Some(dec!(187.5)));
    }
}
