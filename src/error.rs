use crate::models::OrderStatus;

/// Errors surfaced by the trigger engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input rejected before any state was touched
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation not allowed for the record's current status
    #[error("order {id} is {status}, cannot {action}")]
    InvalidState {
        id: u64,
        status: OrderStatus,
        action: &'static str,
    },

    #[error("order {0} not found")]
    NotFound(u64),

    /// Timeout or connection failure talking to the exchange
    #[error("network error: {0}")]
    Network(String),

    /// Missing credentials or HMAC failure
    #[error("signature error: {0}")]
    Signature(String),

    /// Structured rejection returned by the exchange
    #[error("exchange rejected request (code {code:?}): {msg}")]
    ExchangeRejected { code: Option<i64>, msg: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("config error: {0}")]
    Config(String),

    /// Unexpected answer from the daemon's control API
    #[error("control API error: {0}")]
    Control(String),
}

impl Error {
    /// Short human-readable reason, used as the FAILED record annotation
    pub fn reason(&self) -> String {
        match self {
            Error::ExchangeRejected { msg, .. } => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::ExchangeRejected {
                code: None,
                msg: format!("unreadable response: {}", err),
            }
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
