//! Payment-related types
//!
//! These mirror the JSON a resource server forwards to the facilitator. Every
//! field stays in its wire representation (decimal strings, hex strings); the
//! [`crate::validator`] turns them into typed values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// x402 protocol version
pub const X402_VERSION: u32 = 1;

/// Payment scheme identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Immediate one-shot transfer (EIP-3009)
    Exact,
    /// Signed voucher redeemed later through an escrow
    Deferred,
}

impl Scheme {
    /// Get the scheme identifier string
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Exact => super::constants::schemes::EXACT,
            Scheme::Deferred => super::constants::schemes::DEFERRED,
        }
    }

    /// Get scheme by identifier
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            super::constants::schemes::EXACT => Some(Scheme::Exact),
            super::constants::schemes::DEFERRED => Some(Scheme::Deferred),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = crate::X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
            .ok_or_else(|| crate::X402Error::rejected(super::ErrorReason::UnsupportedScheme))
    }
}

/// Payment requirements for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequirements {
    /// Payment scheme identifier (e.g., "exact")
    pub scheme: String,
    /// Blockchain network identifier (e.g., "base-sepolia")
    pub network: String,
    /// Maximum payment amount in atomic token units
    #[serde(rename = "maxAmountRequired")]
    pub max_amount_required: String,
    /// Token contract address
    pub asset: String,
    /// Recipient wallet address for the payment
    #[serde(rename = "payTo")]
    pub pay_to: String,
    /// URL of the protected resource
    #[serde(default)]
    pub resource: String,
    /// Human-readable description of the resource
    #[serde(default)]
    pub description: String,
    /// MIME type of the expected response
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Maximum time allowed for payment completion in seconds
    #[serde(rename = "maxTimeoutSeconds", default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u32,
    /// Scheme-specific additional information (EIP-712 domain `name`/`version`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

fn default_max_timeout_seconds() -> u32 {
    60
}

impl PaymentRequirements {
    /// Create a new payment requirements instance
    pub fn new(
        scheme: impl Into<String>,
        network: impl Into<String>,
        max_amount_required: impl Into<String>,
        asset: impl Into<String>,
        pay_to: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            network: network.into(),
            max_amount_required: max_amount_required.into(),
            asset: asset.into(),
            pay_to: pay_to.into(),
            resource: String::new(),
            description: String::new(),
            mime_type: None,
            max_timeout_seconds: default_max_timeout_seconds(),
            extra: None,
        }
    }

    /// Read a string entry from `extra`
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }
}

/// Payment payload for client payment authorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// Protocol version identifier
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// Payment scheme identifier
    pub scheme: String,
    /// Blockchain network identifier
    pub network: String,
    /// Scheme-specific payment data
    pub payload: SchemePayload,
}

impl PaymentPayload {
    /// Create a new payment payload
    pub fn new(
        scheme: impl Into<String>,
        network: impl Into<String>,
        payload: impl Into<SchemePayload>,
    ) -> Self {
        Self {
            x402_version: X402_VERSION,
            scheme: scheme.into(),
            network: network.into(),
            payload: payload.into(),
        }
    }

    /// The address the payload claims to pay from, unverified
    pub fn claimed_payer(&self) -> &str {
        match &self.payload {
            SchemePayload::Exact(p) => &p.authorization.from,
            SchemePayload::Deferred(p) => &p.voucher.from,
        }
    }

    /// The amount the payload authorizes, unverified
    pub fn claimed_amount(&self) -> &str {
        match &self.payload {
            SchemePayload::Exact(p) => &p.authorization.value,
            SchemePayload::Deferred(p) => &p.voucher.value,
        }
    }
}

/// Scheme-specific body of a [`PaymentPayload`]
///
/// Untagged on the wire: an `authorization` object selects the exact scheme,
/// a `voucher` object selects the deferred scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemePayload {
    Exact(ExactEvmPayload),
    Deferred(DeferredEvmPayload),
}

impl SchemePayload {
    /// Scheme this body belongs to
    pub fn scheme(&self) -> Scheme {
        match self {
            SchemePayload::Exact(_) => Scheme::Exact,
            SchemePayload::Deferred(_) => Scheme::Deferred,
        }
    }
}

impl From<ExactEvmPayload> for SchemePayload {
    fn from(payload: ExactEvmPayload) -> Self {
        SchemePayload::Exact(payload)
    }
}

impl From<DeferredEvmPayload> for SchemePayload {
    fn from(payload: DeferredEvmPayload) -> Self {
        SchemePayload::Deferred(payload)
    }
}

/// Exact EVM payment payload (EIP-3009)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactEvmPayload {
    /// EIP-712 signature for authorization
    pub signature: String,
    /// EIP-3009 authorization parameters
    pub authorization: ExactEvmPayloadAuthorization,
}

/// EIP-3009 authorization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactEvmPayloadAuthorization {
    /// Payer's wallet address
    pub from: String,
    /// Recipient's wallet address
    pub to: String,
    /// Payment amount in atomic units
    pub value: String,
    /// Unix timestamp when authorization becomes valid
    #[serde(rename = "validAfter")]
    pub valid_after: String,
    /// Unix timestamp before which the authorization must be used
    #[serde(rename = "validBefore")]
    pub valid_before: String,
    /// 32-byte random nonce to prevent replay attacks
    pub nonce: String,
}

impl ExactEvmPayloadAuthorization {
    /// Create a new authorization
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        value: impl Into<String>,
        valid_after: impl Into<String>,
        valid_before: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            value: value.into(),
            valid_after: valid_after.into(),
            valid_before: valid_before.into(),
            nonce: nonce.into(),
        }
    }
}

/// Deferred EVM payment payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEvmPayload {
    /// EIP-712 signature over the voucher
    pub signature: String,
    /// Voucher redeemable through the network's escrow contract
    pub voucher: DeferredVoucher,
}

/// Deferred voucher parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredVoucher {
    /// Payer's wallet address
    pub from: String,
    /// Recipient's wallet address
    pub to: String,
    /// Voucher amount in atomic units
    pub value: String,
    /// Unix timestamp after which the voucher can no longer be redeemed
    pub expiry: String,
    /// 32-byte random nonce to prevent replay attacks
    pub nonce: String,
}
