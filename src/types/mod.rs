//! Core types for the x402 facilitator
//!
//! # Architecture
//!
//! - [`network`] - Chains the facilitator settles on and their static details
//! - [`payment`] - Payment requirements and payload structures, as received on the wire
//! - [`facilitator`] - Facilitator requests, responses, receipts and the reason enum
//! - [`constants`] - Protocol constants (networks, schemes, header names)
//!
//! # Examples
//!
//! ```
//! use rust_x402_facilitator::types::{
//!     ExactEvmPayload, ExactEvmPayloadAuthorization, PaymentPayload, PaymentRequirements,
//! };
//!
//! let requirements = PaymentRequirements::new(
//!     "exact",
//!     "avalanche",
//!     "1000000",
//!     "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
//!     "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
//! );
//!
//! let authorization = ExactEvmPayloadAuthorization::new(
//!     "0x857b06519E91e3A54538791bDbb0E22373e36b66",
//!     "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
//!     "1000000",
//!     "1745323800",
//!     "1745323985",
//!     "0xf3746613c2d920b5fdabc0856f2aeb2d4f88ee6037b8cc5d04a71a4462f13480",
//! );
//! let payment = PaymentPayload::new(
//!     "exact",
//!     "avalanche",
//!     ExactEvmPayload { signature: "0x2d6a...".to_string(), authorization },
//! );
//! assert_eq!(payment.network, requirements.network);
//! ```

pub mod constants;
pub mod facilitator;
pub mod network;
pub mod payment;

// Re-export commonly used types
pub use constants::{headers, networks, schemes};
pub use facilitator::{
    ErrorReason, FacilitatorRequest, Receipt, SettleReceiptResponse, SettleRequest,
    SettleResponse, SupportedKind, SupportedKinds, VerifyRequest, VerifyResponse,
};
pub use network::Network;
pub use payment::{
    DeferredEvmPayload, DeferredVoucher, ExactEvmPayload, ExactEvmPayloadAuthorization,
    PaymentPayload, PaymentRequirements, Scheme, SchemePayload, X402_VERSION,
};
