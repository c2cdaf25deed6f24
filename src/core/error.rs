//! Error handling - one flat hierarchy, every variant recoverable

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::types::Asset;

pub type Result<T> = std::result::Result<T, Error>;

/// Desk error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/IO errors talking to the price oracle
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Rejected input (amount below minimum, missing address, mismatched fields)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Debit larger than the current balance
    #[error("Insufficient balance: {asset} available {available}, required {required}")]
    InsufficientBalance {
        asset: Asset,
        available: Decimal,
        required: Decimal,
    },

    /// Price oracle failed; callers fall back to static prices
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Request or offer id no longer resolves
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transition not allowed from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local storage errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failures the initiating actor should see and correct.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::InsufficientBalance { .. })
    }
}
