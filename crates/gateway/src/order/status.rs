use serde::{Deserialize, Serialize};

/// Order status lifecycle as reported by the gateway.
///
/// - `PendingSubmit`/`ApiPending`: not yet acknowledged by the destination
/// - `PreSubmitted`/`Submitted`: acknowledged and working
/// - `Filled`: completely executed
/// - `Cancelled`/`ApiCancelled`/`Inactive`: dead without (complete) execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayOrderStatus {
    PendingSubmit,
    PendingCancel,
    PreSubmitted,
    Submitted,
    ApiPending,
    ApiCancelled,
    Cancelled,
    Filled,
    Inactive,
}

impl GatewayOrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingSubmit => "PendingSubmit",
            Self::PendingCancel => "PendingCancel",
            Self::PreSubmitted => "PreSubmitted",
            Self::Submitted => "Submitted",
            Self::ApiPending => "ApiPending",
            Self::ApiCancelled => "ApiCancelled",
            Self::Cancelled => "Cancelled",
            Self::Filled => "Filled",
            Self::Inactive => "Inactive",
        }
    }

    /// The gateway has taken the order on.
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Submitted | Self::PreSubmitted | Self::Filled)
    }

    /// The order is dead at the gateway.
    pub const fn is_rejected(self) -> bool {
        matches!(self, Self::Cancelled | Self::Inactive | Self::ApiCancelled)
    }

    /// No further status change is expected.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled) || self.is_rejected()
    }
}

impl std::fmt::Display for GatewayOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseOrderStatusError {
    #[error("Invalid gateway order status: '{0}'")]
    InvalidStatus(String),
}

impl std::str::FromStr for GatewayOrderStatus {
    type Err = ParseOrderStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingSubmit" => Ok(Self::PendingSubmit),
            "PendingCancel" => Ok(Self::PendingCancel),
            "PreSubmitted" => Ok(Self::PreSubmitted),
            "Submitted" => Ok(Self::Submitted),
            "ApiPending" => Ok(Self::ApiPending),
            "ApiCancelled" => Ok(Self::ApiCancelled),
            "Cancelled" => Ok(Self::Cancelled),
            "Filled" => Ok(Self::Filled),
            "Inactive" => Ok(Self::Inactive),
            _ => Err(ParseOrderStatusError::InvalidStatus(s.to_string())),
        }
    }
}
