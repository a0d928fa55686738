//! Error types for multimpi.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A single failed exchange with the broker. Agents mask and count these.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Too many consecutive {method} failures ({failures})")]
    TooManyFailures { method: String, failures: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Broker is exiting before the job was launched")]
    BrokerExiting,

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether an agent may sleep and retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
