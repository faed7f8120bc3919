//! Facilitator request and response types

use super::network::Network;
use super::payment::{PaymentPayload, PaymentRequirements, Scheme, X402_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why a payment was rejected or a settlement failed
///
/// Used for both `invalidReason` (verify) and `errorReason` (settle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    // Structural
    UnsupportedVersion,
    UnsupportedScheme,
    NetworkMismatch,
    UnsupportedNetwork,
    UnsupportedAsset,
    InvalidPayload,
    AmountMismatch,
    RecipientMismatch,
    // Verification
    Expired,
    NotYetValid,
    BadSignature,
    NonceReused,
    // Settlement
    Timeout,
    TransactionReverted,
    InsufficientRelayerBalance,
    RpcError,
    SettlementPending,
    // Boundary
    UnexpectedError,
}

impl ErrorReason {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::UnsupportedVersion => "unsupported-version",
            ErrorReason::UnsupportedScheme => "unsupported-scheme",
            ErrorReason::NetworkMismatch => "network-mismatch",
            ErrorReason::UnsupportedNetwork => "unsupported-network",
            ErrorReason::UnsupportedAsset => "unsupported-asset",
            ErrorReason::InvalidPayload => "invalid-payload",
            ErrorReason::AmountMismatch => "amount-mismatch",
            ErrorReason::RecipientMismatch => "recipient-mismatch",
            ErrorReason::Expired => "expired",
            ErrorReason::NotYetValid => "not-yet-valid",
            ErrorReason::BadSignature => "bad-signature",
            ErrorReason::NonceReused => "nonce-reused",
            ErrorReason::Timeout => "timeout",
            ErrorReason::TransactionReverted => "transaction-reverted",
            ErrorReason::InsufficientRelayerBalance => "insufficient-relayer-balance",
            ErrorReason::RpcError => "rpc-error",
            ErrorReason::SettlementPending => "settlement-pending",
            ErrorReason::UnexpectedError => "unexpected-error",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /verify` and `POST /settle`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorRequest {
    /// Protocol version of the request envelope
    #[serde(rename = "x402Version", default = "default_version")]
    pub x402_version: u32,
    /// Signed payment from the client
    #[serde(rename = "paymentPayload")]
    pub payment_payload: PaymentPayload,
    /// Requirements published by the resource server
    #[serde(rename = "paymentRequirements")]
    pub payment_requirements: PaymentRequirements,
}

fn default_version() -> u32 {
    X402_VERSION
}

impl FacilitatorRequest {
    /// Create a request with the current protocol version
    pub fn new(payment_payload: PaymentPayload, payment_requirements: PaymentRequirements) -> Self {
        Self {
            x402_version: X402_VERSION,
            payment_payload,
            payment_requirements,
        }
    }
}

/// Request body of `POST /verify`
pub type VerifyRequest = FacilitatorRequest;

/// Request body of `POST /settle`
pub type SettleRequest = FacilitatorRequest;

/// Payment verification response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Whether the payment is valid
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    /// Payer's address, when it could be determined
    pub payer: Option<String>,
    /// Reason for invalidity (if applicable)
    #[serde(rename = "invalidReason")]
    pub invalid_reason: Option<ErrorReason>,
}

impl VerifyResponse {
    /// A successful verification
    pub fn valid(payer: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            payer: Some(payer.into()),
            invalid_reason: None,
        }
    }

    /// A failed verification
    pub fn invalid(payer: Option<String>, reason: ErrorReason) -> Self {
        Self {
            is_valid: false,
            payer,
            invalid_reason: Some(reason),
        }
    }
}

/// Payment settlement response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleResponse {
    /// Whether the settlement was successful
    pub success: bool,
    /// Payer address if known
    pub payer: Option<String>,
    /// Transaction hash, when a transaction was submitted
    pub transaction: Option<String>,
    /// Network where the transaction was executed
    pub network: String,
    /// Error reason if settlement failed
    #[serde(rename = "errorReason")]
    pub error_reason: Option<ErrorReason>,
}

impl SettleResponse {
    /// A failed settlement
    pub fn failed(network: impl Into<String>, payer: Option<String>, reason: ErrorReason) -> Self {
        Self {
            success: false,
            payer,
            transaction: None,
            network: network.into(),
            error_reason: Some(reason),
        }
    }

    /// Encode the settle response to base64 (the `X-PAYMENT-RESPONSE` header format)
    pub fn to_base64(&self) -> crate::Result<String> {
        use base64::{engine::general_purpose, Engine as _};
        let json = serde_json::to_string(self)?;
        Ok(general_purpose::STANDARD.encode(json))
    }
}

/// Supported payment schemes and networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedKinds {
    /// List of supported payment schemes and networks
    pub kinds: Vec<SupportedKind>,
}

/// Individual supported payment scheme and network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedKind {
    /// Protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// Payment scheme identifier
    pub scheme: Scheme,
    /// Blockchain network identifier
    pub network: Network,
    /// Token contract settled on this network
    pub asset: String,
    /// Additional metadata (the escrow contract for deferred kinds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Client-facing record of a settle call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub request_id: String,
    pub network: String,
    pub scheme: String,
    pub success: bool,
    pub payer: Option<String>,
    pub transaction: Option<String>,
    pub amount: String,
    pub asset: String,
    pub timestamp: DateTime<Utc>,
}

/// Body of a `POST /settle` response: the settle result with its receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleReceiptResponse {
    #[serde(flatten)]
    pub settlement: SettleResponse,
    pub receipt: Receipt,
}
