//! # x402 Facilitator
//!
//! A Rust implementation of the facilitator side of the x402 HTTP-native micropayment
//! protocol: verify signed payment authorizations against a resource's requirements,
//! and settle them on-chain from a relayer account.
//!
//! ## Features
//!
//! - **Two schemes**: `exact` (EIP-3009 `transferWithAuthorization`) and `deferred`
//!   (escrow-redeemed vouchers)
//! - **Multi-network dispatch**: Base, Base Sepolia, Avalanche and Avalanche Fuji, each
//!   with its own RPC endpoint and relayer key
//! - **Cheap verification**: signature recovery and clock checks only, no RPC calls
//! - **Idempotent settlement**: one on-chain transfer per `(network, from, nonce)`, even
//!   under concurrent retries
//! - **Pluggable storage**: in-memory by default, Redis with the `redis` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_x402_facilitator::{
//!     config::FacilitatorSettings, facilitator_storage::InMemoryStorage, server,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = FacilitatorSettings::from_env()?;
//!     let facilitator = settings.build_facilitator(Arc::new(InMemoryStorage::new()))?;
//!
//!     let app = server::router(Arc::new(facilitator));
//!     let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`types`**: Wire types, networks, schemes and the error reason enum
//! - **`registry`**: The (scheme, network, asset) triples on offer
//! - **`validator`**: Structural checks of a payload against its requirements
//! - **`verifier`**: Signature, validity window and nonce checks
//! - **`settlement`**: Per-network settlement backends and the idempotent dispatcher
//! - **`receipt`**: Receipts and protocol response headers
//! - **`facilitator`**: The `supported` / `verify` / `settle` facade
//! - **`facilitator_storage`**: Nonce and settlement record storage
//! - **`config`**: Environment-driven settings
//! - **`server`**: Axum routes (feature `axum`)

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod facilitator;
pub mod facilitator_storage;
pub mod receipt;
pub mod registry;
pub mod settlement;
pub mod types;
pub mod validator;
pub mod verifier;

#[cfg(feature = "axum")]
pub mod server;

pub use error::{Result, X402Error};
pub use facilitator::Facilitator;
pub use registry::SchemeRegistry;
pub use types::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants() {
        assert_eq!(X402_VERSION, 1);
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_request_wire_format() {
        let request = test_support::exact_request(
            Network::BaseSepolia,
            "1000",
            "1000",
            test_support::NOW,
            test_support::NOW + 60,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["paymentPayload"]["scheme"], "exact");
        assert_eq!(json["paymentRequirements"]["maxAmountRequired"], "1000");

        let parsed: FacilitatorRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, request);
    }
}
