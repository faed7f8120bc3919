//! Error types for the x402 facilitator

use crate::types::ErrorReason;
use thiserror::Error;

/// Result type alias for x402 operations
pub type Result<T> = std::result::Result<T, X402Error>;

/// Errors raised inside the facilitator core
///
/// Protocol outcomes (a rejected payload, a reverted settlement) travel as
/// [`X402Error::PaymentRejected`] and [`X402Error::SettlementFailed`] so that
/// `?` can short-circuit the checks. The facade converts every variant into a
/// typed response through [`X402Error::reason`].
#[derive(Debug, Error)]
pub enum X402Error {
    /// The payload failed a structural or verification check
    #[error("Payment rejected: {reason}")]
    PaymentRejected { reason: ErrorReason },

    /// Settlement was attempted and did not complete
    #[error("Settlement failed ({reason}): {message}")]
    SettlementFailed {
        reason: ErrorReason,
        message: String,
    },

    /// Network is not configured on this facilitator
    #[error("Network not supported: {network}")]
    NetworkNotSupported { network: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed or unrecoverable signature
    #[error("Invalid signature: {message}")]
    InvalidSignature { message: String },

    /// Nonce storage failure
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// JSON-RPC level failure reported by a node
    #[error("RPC error: {message}")]
    Rpc { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl X402Error {
    /// Create a rejection carrying a protocol reason
    pub fn rejected(reason: ErrorReason) -> Self {
        Self::PaymentRejected { reason }
    }

    /// Create a settlement failure
    pub fn settlement(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self::SettlementFailed {
            reason,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid signature error
    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an RPC error
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
        }
    }

    /// Project the error onto the wire-level reason
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::PaymentRejected { reason } | Self::SettlementFailed { reason, .. } => *reason,
            Self::NetworkNotSupported { .. } => ErrorReason::UnsupportedNetwork,
            Self::InvalidSignature { .. } => ErrorReason::BadSignature,
            Self::Rpc { .. } => ErrorReason::RpcError,
            Self::Http(e) if e.is_timeout() => ErrorReason::Timeout,
            Self::Http(_) => ErrorReason::RpcError,
            Self::Config { .. }
            | Self::Storage { .. }
            | Self::Json(_)
            | Self::Io(_) => ErrorReason::UnexpectedError,
        }
    }
}
