use thiserror::Error;

#[derive(Error, Debug)]
pub enum BalanceReplayError {
    #[error("Invalid lookback window of {0} months: must be at least 1")]
    InvalidLookback(u32),

    #[cfg(feature = "api")]
    #[error("Ledger API unreachable: {0}")]
    LedgerUnreachable(#[from] reqwest::Error),

    #[cfg(feature = "api")]
    #[error("Ledger API returned status {status}: {body}")]
    LedgerStatus { status: u16, body: String },

    #[cfg(feature = "api")]
    #[error("Malformed ledger payload: {0}")]
    MalformedPayload(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BalanceReplayError>;
