//! Cryptographic utilities for x402 payments
//!
//! - [`eip712`] - EIP-712 typed data hashing for transfer authorizations and deferred vouchers
//! - [`signature`] - ECDSA signing, public key recovery and address helpers
//!
//! Verification never touches the network: recovering the payer is a pure function of
//! the typed data and the signature.
//!
//! # Examples
//!
//! ```
//! use rust_x402_facilitator::crypto::{eip712, signature};
//! use ethereum_types::{Address, H256, U256};
//!
//! # fn example() -> rust_x402_facilitator::Result<()> {
//! let key = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
//! let payer = signature::address_from_secret_key(&signature::parse_private_key(key)?);
//!
//! let domain = eip712::Domain {
//!     name: "USD Coin".to_string(),
//!     version: "2".to_string(),
//!     chain_id: 43114,
//!     verifying_contract: Address::repeat_byte(0x11),
//! };
//! let digest = eip712::transfer_with_authorization_hash(
//!     &domain,
//!     payer,
//!     Address::repeat_byte(0x22),
//!     U256::from(1_000_000u64),
//!     U256::zero(),
//!     U256::from(u64::MAX),
//!     H256::repeat_byte(0x33),
//! );
//!
//! let sig = signature::sign_message_hash(digest, key)?;
//! let sig_bytes = hex::decode(sig.trim_start_matches("0x")).unwrap();
//! assert_eq!(signature::recover_address(digest, &sig_bytes)?, payer);
//! # Ok(())
//! # }
//! ```

pub mod eip712;
pub mod signature;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use eip712::Domain;
pub use signature::{
    parse_address, recover_address, sign_message_hash, to_checksum_address,
    verify_eip712_signature,
};
