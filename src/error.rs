//! Error types for the fund recovery tooling

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for funding and recovery
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required setting: {0}")]
    MissingEnvVar(String),

    #[error("Unknown network '{name}', expected one of: {known}")]
    InvalidNetwork { name: String, known: String },

    #[error("Invalid CRON expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    #[error("Receipt for {tx_hash} not found after {timeout_secs}s")]
    ReceiptTimeout { tx_hash: String, timeout_secs: u64 },

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    // Payment manager errors
    #[error("Payment manager call failed: {0}")]
    Contract(String),

    // Persistence errors
    #[error("Account ledger error: {0}")]
    Ledger(String),

    #[error("Withdrawal state error: {0}")]
    State(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    // Operator decisions
    #[error("Aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if the remote rejected a transaction because its nonce was stale
    pub fn is_nonce_too_low(&self) -> bool {
        match self {
            Error::TransactionSend(msg) | Error::Rpc(msg) => {
                msg.to_ascii_lowercase().contains("nonce too low")
            }
            _ => false,
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        self.is_nonce_too_low()
    }

    /// Check if this error means the tool cannot proceed at all
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::MissingEnvVar(_)
                | Error::InvalidNetwork { .. }
                | Error::InvalidCron { .. }
                | Error::InvalidKey(_)
                | Error::Aborted(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
