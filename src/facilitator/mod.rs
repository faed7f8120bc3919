//! Facilitator facade for verifying and settling payments
//!
//! [`Facilitator`] is the single entry point the HTTP layer talks to. It composes
//! the [`SchemeRegistry`], the payload validator, the
//! [`AuthorizationVerifier`] and the [`SettlementDispatcher`], and turns every
//! failure into a typed response. Nothing leaves this module as an error.
//!
//! # Examples
//!
//! ```
//! use rust_x402_facilitator::facilitator::Facilitator;
//! use rust_x402_facilitator::registry::SchemeRegistry;
//! use rust_x402_facilitator::types::Network;
//!
//! let registry = SchemeRegistry::new()
//!     .with_exact(Network::BaseSepolia)
//!     .with_exact(Network::AvalancheFuji);
//! let facilitator = Facilitator::builder(registry).build();
//!
//! let supported = facilitator.supported();
//! assert_eq!(supported.kinds.len(), 2);
//! ```
//!
//! Settlement needs a backend per network:
//!
//! ```no_run
//! use rust_x402_facilitator::crypto::signature::parse_private_key;
//! use rust_x402_facilitator::facilitator::Facilitator;
//! use rust_x402_facilitator::registry::SchemeRegistry;
//! use rust_x402_facilitator::settlement::EvmSettlementBackend;
//! use rust_x402_facilitator::types::Network;
//! use std::sync::Arc;
//!
//! # fn example() -> rust_x402_facilitator::Result<()> {
//! let backend = EvmSettlementBackend::new(
//!     Network::BaseSepolia,
//!     url::Url::parse("https://sepolia.base.org").unwrap(),
//!     parse_private_key(&std::env::var("RELAYER_PRIVATE_KEY").unwrap())?,
//! )?;
//!
//! let facilitator = Facilitator::builder(SchemeRegistry::new().with_exact(Network::BaseSepolia))
//!     .with_backend(Network::BaseSepolia, Arc::new(backend))
//!     .build();
//! # Ok(())
//! # }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::crypto::signature::to_checksum_address;
use crate::facilitator_storage::{InMemoryStorage, NonceStorage};
use crate::receipt::{create_receipt, supported_response};
use crate::registry::SchemeRegistry;
use crate::settlement::batch::{DEFAULT_BATCH_WINDOW, DEFAULT_MAX_BATCH};
use crate::settlement::{
    SettlementBackend, SettlementDispatcher, DEFAULT_NONCE_RETENTION, DEFAULT_SETTLEMENT_TIMEOUT,
};
use crate::types::{
    ErrorReason, Network, SettleReceiptResponse, SettleRequest, SettleResponse, SupportedKinds,
    VerifyRequest, VerifyResponse,
};
use crate::validator::{claimed_payer, validate_request};
use crate::verifier::AuthorizationVerifier;
use crate::X402Error;
use std::sync::Arc;
use std::time::Duration;


/// Verify and settle entry point
#[derive(Debug)]
pub struct Facilitator {
    registry: Arc<SchemeRegistry>,
    verifier: AuthorizationVerifier,
    dispatcher: SettlementDispatcher,
    clock: Arc<dyn Clock>,
}

/// Builder for [`Facilitator`]
#[derive(Debug)]
pub struct FacilitatorBuilder {
    registry: SchemeRegistry,
    storage: Option<Arc<dyn NonceStorage>>,
    clock: Arc<dyn Clock>,
    backends: Vec<(Network, Arc<dyn SettlementBackend>)>,
    settlement_timeout: Duration,
    nonce_retention: Duration,
    batch_window: Duration,
    max_batch: usize,
}

impl FacilitatorBuilder {
    /// Nonce storage shared by verification and settlement (default: in-memory)
    pub fn with_storage(mut self, storage: Arc<dyn NonceStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Settlement backend for a network
    pub fn with_backend(mut self, network: Network, backend: Arc<dyn SettlementBackend>) -> Self {
        self.backends.push((network, backend));
        self
    }

    /// Bound on submission plus confirmation of one settlement
    pub fn with_settlement_timeout(mut self, timeout: Duration) -> Self {
        self.settlement_timeout = timeout;
        self
    }

    /// How long a consumed nonce is remembered after its authorization expires
    pub fn with_nonce_retention(mut self, retention: Duration) -> Self {
        self.nonce_retention = retention;
        self
    }

    /// Deferred vouchers are redeemed together once `window` has passed since the
    /// first one, or as soon as `max_batch` are waiting
    pub fn with_voucher_batching(mut self, window: Duration, max_batch: usize) -> Self {
        self.batch_window = window;
        self.max_batch = max_batch;
        self
    }

    pub fn build(self) -> Facilitator {
        let storage: Arc<dyn NonceStorage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(InMemoryStorage::new()),
        };

        let dispatcher = self.backends.into_iter().fold(
            SettlementDispatcher::new(storage.clone())
                .with_timeout(self.settlement_timeout)
                .with_retention(self.nonce_retention)
                .with_voucher_batching(self.batch_window, self.max_batch),
            |dispatcher, (network, backend)| dispatcher.with_backend(network, backend),
        );

        Facilitator {
            registry: Arc::new(self.registry),
            verifier: AuthorizationVerifier::new(self.clock.clone(), storage),
            dispatcher,
            clock: self.clock,
        }
    }
}

impl Facilitator {
    /// Start building a facilitator offering the kinds in `registry`
    pub fn builder(registry: SchemeRegistry) -> FacilitatorBuilder {
        FacilitatorBuilder {
            registry,
            storage: None,
            clock: Arc::new(SystemClock),
            backends: Vec::new(),
            settlement_timeout: DEFAULT_SETTLEMENT_TIMEOUT,
            nonce_retention: DEFAULT_NONCE_RETENTION,
            batch_window: DEFAULT_BATCH_WINDOW,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    pub fn registry(&self) -> &SchemeRegistry {
        &self.registry
    }

    /// Every (scheme, network, asset) offered
    pub fn supported(&self) -> SupportedKinds {
        supported_response(&self.registry)
    }

    /// Verify a payment without moving funds or consuming its nonce
    pub async fn verify(&self, request: &VerifyRequest) -> VerifyResponse {
        let result = async {
            let payment = validate_request(&self.registry, request)?;
            self.verifier.verify(&payment).await?;
            Ok::<_, X402Error>(payment.payer())
        }
        .await;

        match result {
            Ok(payer) => {
                let payer = to_checksum_address(&payer);
                tracing::info!(
                    network = %request.payment_payload.network,
                    scheme = %request.payment_payload.scheme,
                    payer = %payer,
                    "Payment verified"
                );
                VerifyResponse::valid(payer)
            }
            Err(e) => {
                let reason = self.log_failure("Verification", request, &e);
                VerifyResponse::invalid(payer_hint(request, reason), reason)
            }
        }
    }

    /// Settle a payment on its network
    pub async fn settle(&self, request: &SettleRequest) -> SettleResponse {
        let result = async {
            let payment = validate_request(&self.registry, request)?;
            self.dispatcher.settle(&payment, &self.verifier).await
        }
        .await;

        match result {
            Ok(response) => {
                tracing::info!(
                    network = %response.network,
                    payer = ?response.payer,
                    transaction = ?response.transaction,
                    "Payment settled"
                );
                response
            }
            Err(e) => {
                let reason = self.log_failure("Settlement", request, &e);
                SettleResponse::failed(
                    request.payment_payload.network.clone(),
                    payer_hint(request, reason),
                    reason,
                )
            }
        }
    }

    /// Redeem every deferred voucher still waiting for its batch
    pub async fn redeem_pending(&self) -> usize {
        let redeemed = self.dispatcher.redeem_pending().await;
        if redeemed > 0 {
            tracing::info!(vouchers = redeemed, "Redeemed pending vouchers");
        }
        redeemed
    }

    /// Settle and attach the receipt for `request_id`
    pub async fn settle_with_receipt(
        &self,
        request_id: &str,
        request: &SettleRequest,
    ) -> SettleReceiptResponse {
        let settlement = self.settle(request).await;
        let receipt = create_receipt(request_id, request, &settlement, self.clock.now());
        SettleReceiptResponse {
            settlement,
            receipt,
        }
    }

    fn log_failure(&self, operation: &str, request: &VerifyRequest, error: &X402Error) -> ErrorReason {
        let reason = error.reason();
        match reason {
            ErrorReason::UnexpectedError | ErrorReason::RpcError => tracing::error!(
                network = %request.payment_payload.network,
                scheme = %request.payment_payload.scheme,
                error = %error,
                "{} failed", operation
            ),
            _ => tracing::warn!(
                network = %request.payment_payload.network,
                scheme = %request.payment_payload.scheme,
                reason = %reason,
                error = %error,
                "{} rejected", operation
            ),
        }
        reason
    }
}

/// Claimed payer for a failed call, withheld when the signature did not match it
fn payer_hint(request: &VerifyRequest, reason: ErrorReason) -> Option<String> {
    if reason == ErrorReason::BadSignature {
        return None;
    }
    claimed_payer(&request.payment_payload).map(|payer| to_checksum_address(&payer))
}
