//! Backend error types

use thiserror::Error;

/// Errors that can occur when talking to the hosted backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Request timeout")]
    Timeout,

    #[error("Rate limited")]
    RateLimited,

    /// The ledger refused a debit
    #[error("Not enough coins (price {price})")]
    InsufficientCoins { price: i64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Map a transport error onto the coarse variants used for retries
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_connect() {
            BackendError::Unavailable
        } else {
            BackendError::Request(e)
        }
    }

    /// Whether retrying the same idempotent call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Unavailable | BackendError::Timeout | BackendError::RateLimited => true,
            BackendError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::InsufficientCoins { price: 5 };
        assert_eq!(err.to_string(), "Not enough coins (price 5)");

        let err = BackendError::Api {
            status: 404,
            message: "relation does not exist".to_string(),
        };
        assert_eq!(err.to_string(), "API error 404: relation does not exist");
    }

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Timeout.is_transient());
        assert!(BackendError::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!BackendError::Api {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!BackendError::InsufficientCoins { price: 1 }.is_transient());
    }
}
