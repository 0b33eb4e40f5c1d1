use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A diagnostic message the gateway attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
    /// Zero for plain informational entries.
    pub error_code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, error_code: i32) -> Self {
        Self {
            time: Utc::now(),
            message: message.into(),
            error_code,
        }
    }

    /// Codes 2100-2199 are farm/connectivity notices and 399 is the order "warning"
    /// message; neither means the order failed.
    pub const fn severity(&self) -> Severity {
        match self.error_code {
            0 => Severity::Info,
            399 | 2100..=2199 => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.error_code == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "[{}] {}", self.error_code, self.message)
        }
    }
}

/// The most severe non-empty entry; among equally severe entries the latest wins.
pub fn most_severe(entries: &[LogEntry]) -> Option<&LogEntry> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.message.trim().is_empty())
        .max_by_key(|(index, entry)| (entry.severity(), *index))
        .map(|(_, entry)| entry)
}
