// src/error.rs

use thiserror::Error;

/// Errors raised inside the monitor.
///
/// None of these are fatal: every loop that can produce one logs it and keeps
/// going on its next cycle.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Network or HTTP failure while talking to the directory or ticker feed.
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// An instrument symbol that does not follow `{side}-{asset}-{strike}-{expiry}`.
    #[error("malformed symbol `{symbol}`: {reason}")]
    MalformedSymbol { symbol: String, reason: String },

    /// The streaming transport dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The notification sink rejected or could not be reached.
    #[error("notification delivery failed: {0}")]
    NotificationDelivery(String),

    /// Configuration or runtime mutator input was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown asset `{0}`")]
    UnknownAsset(String),
}

impl MonitorError {
    pub fn malformed(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::MalformedSymbol {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(e: reqwest::Error) -> Self {
        MonitorError::TransientFetch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
