//! Settlement of verified payments
//!
//! The [`SettlementDispatcher`] picks the backend configured for the payment's
//! network, claims the `(network, from, nonce)` key and moves the funds. Exact
//! payments get their own `transferWithAuthorization`; deferred vouchers join a
//! per-recipient batch that is redeemed with one `redeemVouchers` call (see
//! [`batch`]).
//!
//! Every transaction is signed first, stored as [`SettlementRecord::Submitted`]
//! together with its raw bytes, and only then broadcast. A failure before that
//! record releases the claim. After it, the record stays and a retry broadcasts
//! the same bytes again and resumes confirmation. A retry after success replays
//! the stored [`SettleResponse`].

pub mod batch;
pub mod evm;

use crate::crypto::signature::to_checksum_address;
use crate::facilitator_storage::{NonceKey, NonceStorage, SettlementRecord};
use crate::types::{ErrorReason, Network, SettleResponse};
use crate::validator::{Authorization, DeferredAuthorization, ExactAuthorization, ValidatedPayment};
use crate::verifier::AuthorizationVerifier;
use crate::{Result, X402Error};
use async_trait::async_trait;
use dashmap::DashMap;
use ethereum_types::{Address, H256, U256};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub use batch::VoucherBatcher;
pub use evm::EvmSettlementBackend;

/// Default bound on one settlement, from claim to confirmation
pub const DEFAULT_SETTLEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a consumed nonce is kept past its authorization's deadline
pub const DEFAULT_NONCE_RETENTION: Duration = Duration::from_secs(86_400);

/// Submits contract calls to one network
#[async_trait]
pub trait SettlementBackend: Send + Sync + Debug {
    /// Build and sign the transaction carrying `call`, without sending it
    ///
    /// An error means nothing reached the network.
    async fn prepare(&self, call: &SettlementCall) -> Result<PreparedTransaction>;

    /// Hand a prepared transaction to the network
    ///
    /// Sending the same transaction twice must be harmless. An error does not
    /// prove the node dropped it.
    async fn broadcast(&self, transaction: &PreparedTransaction) -> Result<()>;

    /// Wait until the transaction is mined; a failed receipt is
    /// [`ErrorReason::TransactionReverted`]
    async fn confirm(&self, transaction: H256) -> Result<()>;
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    /// Hash the network will know the transaction by
    pub hash: H256,
    pub raw: Vec<u8>,
}

/// ECDSA signature split the way contracts take it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSignature {
    pub v: u8,
    pub r: H256,
    pub s: H256,
}

impl SplitSignature {
    /// Split a 65-byte `r || s || v` signature, normalising `v` to 27/28
    pub fn from_bytes(signature: &[u8]) -> Result<Self> {
        if signature.len() != 65 {
            return Err(X402Error::invalid_signature("Signature must be 65 bytes"));
        }
        let v = match signature[64] {
            v @ (0 | 1) => v + 27,
            v => v,
        };
        Ok(Self {
            v,
            r: H256::from_slice(&signature[..32]),
            s: H256::from_slice(&signature[32..64]),
        })
    }
}

/// One voucher in a redemption batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedVoucher {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub expiry: U256,
    pub nonce: H256,
    pub signature: SplitSignature,
}

impl SignedVoucher {
    pub fn from_authorization(voucher: &DeferredAuthorization) -> Result<Self> {
        Ok(Self {
            from: voucher.from,
            to: voucher.to,
            value: voucher.value,
            expiry: voucher.expiry,
            nonce: voucher.nonce,
            signature: SplitSignature::from_bytes(&voucher.signature)?,
        })
    }
}

/// Contract call that moves the funds of one or more payments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementCall {
    /// EIP-3009 `transferWithAuthorization` on the token contract
    TransferWithAuthorization {
        asset: Address,
        from: Address,
        to: Address,
        value: U256,
        valid_after: U256,
        valid_before: U256,
        nonce: H256,
        signature: SplitSignature,
    },
    /// `redeemVouchers` on the escrow contract
    RedeemVouchers {
        escrow: Address,
        vouchers: Vec<SignedVoucher>,
    },
}

impl SettlementCall {
    /// Transfer of `asset` executing an exact authorization
    pub fn transfer(asset: Address, auth: &ExactAuthorization) -> Result<Self> {
        Ok(SettlementCall::TransferWithAuthorization {
            asset,
            from: auth.from,
            to: auth.to,
            value: auth.value,
            valid_after: auth.valid_after,
            valid_before: auth.valid_before,
            nonce: auth.nonce,
            signature: SplitSignature::from_bytes(&auth.signature)?,
        })
    }

    /// Contract the call is sent to
    pub fn target(&self) -> Address {
        match self {
            SettlementCall::TransferWithAuthorization { asset, .. } => *asset,
            SettlementCall::RedeemVouchers { escrow, .. } => *escrow,
        }
    }
}

/// Routes verified payments to per-network backends
#[derive(Debug)]
pub struct SettlementDispatcher {
    backends: HashMap<Network, Arc<dyn SettlementBackend>>,
    storage: Arc<dyn NonceStorage>,
    timeout: Duration,
    retention: Duration,
    batcher: VoucherBatcher,
    locks: DashMap<NonceKey, Arc<Mutex<()>>>,
}

impl SettlementDispatcher {
    pub fn new(storage: Arc<dyn NonceStorage>) -> Self {
        Self {
            backends: HashMap::new(),
            batcher: VoucherBatcher::new(storage.clone()),
            storage,
            timeout: DEFAULT_SETTLEMENT_TIMEOUT,
            retention: DEFAULT_NONCE_RETENTION,
            locks: DashMap::new(),
        }
    }

    /// Register the backend for a network, replacing any previous one
    pub fn with_backend(mut self, network: Network, backend: Arc<dyn SettlementBackend>) -> Self {
        self.backends.insert(network, backend);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.batcher = self.batcher.with_timeout(timeout);
        self
    }

    /// How long a consumed nonce is kept after its authorization expires
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// How long a voucher batch stays open, and how many vouchers close it early
    pub fn with_voucher_batching(mut self, window: Duration, max_batch: usize) -> Self {
        self.batcher = self.batcher.with_window(window).with_max_batch(max_batch);
        self
    }

    /// Redeem every open voucher batch now, returning how many vouchers were in them
    pub async fn redeem_pending(&self) -> usize {
        self.batcher.flush_all().await
    }

    /// Settle a validated payment
    ///
    /// Concurrent calls for the same key run one at a time; the first executes
    /// the transfer and the rest observe its stored outcome.
    pub async fn settle(
        &self,
        payment: &ValidatedPayment,
        verifier: &AuthorizationVerifier,
    ) -> Result<SettleResponse> {
        let key = payment.nonce_key();
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.settle_locked(&key, payment, verifier).await
        };

        drop(lock);
        self.locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn settle_locked(
        &self,
        key: &NonceKey,
        payment: &ValidatedPayment,
        verifier: &AuthorizationVerifier,
    ) -> Result<SettleResponse> {
        verifier.verify_signature(payment)?;

        match self.storage.settlement(key).await? {
            Some(SettlementRecord::Settled { response }) => {
                tracing::info!(key = %key, "Replaying stored settlement");
                return Ok(response);
            }
            Some(SettlementRecord::Submitted { transaction, raw }) => {
                tracing::info!(key = %key, transaction = ?transaction, "Resuming settlement");
                let backend = self.backend(payment.network)?;
                let prepared = PreparedTransaction {
                    hash: transaction,
                    raw,
                };
                let deadline = Instant::now() + self.timeout;
                return self.resume(key, backend.as_ref(), &prepared, deadline).await;
            }
            Some(SettlementRecord::Claimed) => {
                return Err(X402Error::settlement(
                    ErrorReason::SettlementPending,
                    format!("settlement of {} has not been signed yet", key),
                ));
            }
            None => {}
        }

        let backend = self.backend(payment.network)?;
        verifier.verify_time(payment)?;

        if !self.storage.claim_nonce(key, self.expires_at(payment)).await? {
            return Err(X402Error::rejected(ErrorReason::NonceReused));
        }
        let deadline = Instant::now() + self.timeout;

        match &payment.authorization {
            Authorization::Exact(auth) => {
                let call = match SettlementCall::transfer(payment.asset, auth) {
                    Ok(call) => call,
                    Err(e) => {
                        self.storage.remove_nonce(key).await?;
                        return Err(e);
                    }
                };
                let transaction =
                    execute(self.storage.as_ref(), backend.as_ref(), &call, &[*key], deadline)
                        .await?;
                record_settled(self.storage.as_ref(), key, transaction).await
            }
            Authorization::Deferred(voucher) => {
                let voucher = match SignedVoucher::from_authorization(voucher) {
                    Ok(voucher) => voucher,
                    Err(e) => {
                        self.storage.remove_nonce(key).await?;
                        return Err(e);
                    }
                };
                self.batcher
                    .enqueue(
                        backend.clone(),
                        payment.domain.verifying_contract,
                        *key,
                        voucher,
                        deadline,
                    )
                    .await
            }
        }
    }

    /// Broadcast a stored transaction again and wait for its receipt
    async fn resume(
        &self,
        key: &NonceKey,
        backend: &dyn SettlementBackend,
        prepared: &PreparedTransaction,
        deadline: Instant,
    ) -> Result<SettleResponse> {
        let outcome = within(deadline, async {
            if let Err(e) = backend.broadcast(prepared).await {
                // The node usually has it already; the receipt decides
                tracing::warn!(key = %key, error = %e, "Rebroadcast failed");
            }
            backend.confirm(prepared.hash).await
        })
        .await;
        finish(self.storage.as_ref(), &[*key], outcome).await?;
        record_settled(self.storage.as_ref(), key, prepared.hash).await
    }

    /// Unix second after which the key may be forgotten
    ///
    /// `None` when the deadline does not fit a timestamp, which keeps the key forever.
    fn expires_at(&self, payment: &ValidatedPayment) -> Option<u64> {
        let deadline = payment.deadline();
        if deadline > U256::from(u64::MAX) {
            return None;
        }
        deadline.as_u64().checked_add(self.retention.as_secs())
    }

    fn backend(&self, network: Network) -> Result<&Arc<dyn SettlementBackend>> {
        self.backends
            .get(&network)
            .ok_or_else(|| X402Error::NetworkNotSupported {
                network: network.to_string(),
            })
    }
}

/// Sign, record, broadcast and confirm one call settling every key in `keys`
///
/// Returns the transaction hash. The claims are released when nothing was
/// broadcast or the transaction reverted; otherwise the keys stay
/// [`SettlementRecord::Submitted`].
pub(crate) async fn execute(
    storage: &dyn NonceStorage,
    backend: &dyn SettlementBackend,
    call: &SettlementCall,
    keys: &[NonceKey],
    deadline: Instant,
) -> Result<H256> {
    let prepared = match within(deadline, backend.prepare(call)).await {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::warn!(contract = ?call.target(), error = %e, "Settlement preparation failed");
            release(storage, keys).await?;
            return Err(e);
        }
    };

    for key in keys {
        storage
            .record(
                key,
                SettlementRecord::Submitted {
                    transaction: prepared.hash,
                    raw: prepared.raw.clone(),
                },
            )
            .await?;
    }
    tracing::info!(
        contract = ?call.target(),
        transaction = ?prepared.hash,
        payments = keys.len(),
        "Settlement transaction signed"
    );

    if let Err(e) = within(deadline, backend.broadcast(&prepared)).await {
        tracing::warn!(
            transaction = ?prepared.hash,
            error = %e,
            "Broadcast failed; transaction kept for retry"
        );
        return Err(e);
    }

    let outcome = within(deadline, backend.confirm(prepared.hash)).await;
    finish(storage, keys, outcome).await?;
    Ok(prepared.hash)
}

/// Release the claims of a reverted transaction and pass the outcome on
async fn finish(storage: &dyn NonceStorage, keys: &[NonceKey], outcome: Result<()>) -> Result<()> {
    if let Err(e) = &outcome {
        if e.reason() == ErrorReason::TransactionReverted {
            release(storage, keys).await?;
        }
    }
    outcome
}

async fn release(storage: &dyn NonceStorage, keys: &[NonceKey]) -> Result<()> {
    for key in keys {
        storage.remove_nonce(key).await?;
    }
    Ok(())
}

/// Store and return the success response of a confirmed transaction
pub(crate) async fn record_settled(
    storage: &dyn NonceStorage,
    key: &NonceKey,
    transaction: H256,
) -> Result<SettleResponse> {
    let response = SettleResponse {
        success: true,
        payer: Some(to_checksum_address(&key.from)),
        transaction: Some(format!("{:#x}", transaction)),
        network: key.network.to_string(),
        error_reason: None,
    };
    storage
        .record(
            key,
            SettlementRecord::Settled {
                response: response.clone(),
            },
        )
        .await?;
    Ok(response)
}

/// Run a settlement step, failing with [`ErrorReason::Timeout`] at `deadline`
pub(crate) async fn within<T, F>(deadline: Instant, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(X402Error::settlement(
            ErrorReason::Timeout,
            "settlement did not complete in time",
        )),
    }
}
