//! Cryptographic and temporal verification of validated payments
//!
//! The verifier recovers the signer of the typed authorization, checks the
//! validity window against the injected [`Clock`] and looks the nonce up in the
//! [`NonceStorage`]. It never writes to storage and never talks to a chain, so a
//! resource server can call it on every request.

use crate::clock::Clock;
use crate::crypto::{eip712, signature};
use crate::facilitator_storage::NonceStorage;
use crate::types::ErrorReason;
use crate::validator::{Authorization, ValidatedPayment};
use crate::{Result, X402Error};
use ethereum_types::{H256, U256};
use std::sync::Arc;

/// Verifies signatures, time windows and nonce freshness
#[derive(Debug, Clone)]
pub struct AuthorizationVerifier {
    clock: Arc<dyn Clock>,
    storage: Arc<dyn NonceStorage>,
}

impl AuthorizationVerifier {
    pub fn new(clock: Arc<dyn Clock>, storage: Arc<dyn NonceStorage>) -> Self {
        Self { clock, storage }
    }

    /// Run every check, in order: signature, time window, nonce
    pub async fn verify(&self, payment: &ValidatedPayment) -> Result<()> {
        self.verify_signature(payment)?;
        self.verify_time(payment)?;

        if self.storage.has_nonce(&payment.nonce_key()).await? {
            return Err(X402Error::rejected(ErrorReason::NonceReused));
        }
        Ok(())
    }

    /// Signature and time checks only, for a settlement that already holds the nonce
    pub fn verify_authorization(&self, payment: &ValidatedPayment) -> Result<()> {
        self.verify_signature(payment)?;
        self.verify_time(payment)
    }

    /// The recovered signer must be the claimed payer
    pub fn verify_signature(&self, payment: &ValidatedPayment) -> Result<()> {
        let (digest, sig) = signing_digest(payment);
        // Any recovery failure is reported the same way as a wrong signer
        match signature::verify_eip712_signature(sig, digest, payment.payer()) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(X402Error::rejected(ErrorReason::BadSignature)),
        }
    }

    /// `validAfter <= now < validBefore` for exact, `now < expiry` for deferred
    pub fn verify_time(&self, payment: &ValidatedPayment) -> Result<()> {
        let now = U256::from(self.clock.unix_now());
        match &payment.authorization {
            Authorization::Exact(auth) => {
                if now < auth.valid_after {
                    return Err(X402Error::rejected(ErrorReason::NotYetValid));
                }
                if now >= auth.valid_before {
                    return Err(X402Error::rejected(ErrorReason::Expired));
                }
            }
            Authorization::Deferred(voucher) => {
                if now >= voucher.expiry {
                    return Err(X402Error::rejected(ErrorReason::Expired));
                }
            }
        }
        Ok(())
    }
}

/// EIP-712 digest the payer signed, with the signature bytes
fn signing_digest(payment: &ValidatedPayment) -> (H256, &[u8]) {
    match &payment.authorization {
        Authorization::Exact(auth) => (
            eip712::transfer_with_authorization_hash(
                &payment.domain,
                auth.from,
                auth.to,
                auth.value,
                auth.valid_after,
                auth.valid_before,
                auth.nonce,
            ),
            auth.signature.as_slice(),
        ),
        Authorization::Deferred(voucher) => (
            eip712::deferred_voucher_hash(
                &payment.domain,
                voucher.from,
                voucher.to,
                voucher.value,
                voucher.expiry,
                voucher.nonce,
            ),
            voucher.signature.as_slice(),
        ),
    }
}
