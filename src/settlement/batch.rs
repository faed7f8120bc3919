//! Accumulation of deferred vouchers into shared redemptions
//!
//! Vouchers are grouped by `(network, payTo)`. A group opens with its first
//! voucher and is redeemed with one `redeemVouchers` call when it reaches the
//! size limit, when its window elapses, or on [`VoucherBatcher::flush_all`].
//! Every voucher in the group ends up with the same transaction hash and its
//! own stored [`SettleResponse`].

use super::{execute, record_settled, SettlementBackend, SettlementCall, SignedVoucher};
use crate::facilitator_storage::{NonceKey, NonceStorage};
use crate::types::{ErrorReason, Network, SettleResponse};
use crate::{Result, X402Error};
use dashmap::DashMap;
use ethereum_types::Address;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Default time a batch stays open after its first voucher
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(2);

/// Default number of vouchers that closes a batch early
pub const DEFAULT_MAX_BATCH: usize = 16;

type Outcome = std::result::Result<SettleResponse, (ErrorReason, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BatchKey {
    network: Network,
    pay_to: Address,
}

#[derive(Debug)]
struct PendingVoucher {
    key: NonceKey,
    voucher: SignedVoucher,
    reply: oneshot::Sender<Outcome>,
}

#[derive(Debug)]
struct Batch {
    id: u64,
    escrow: Address,
    backend: Arc<dyn SettlementBackend>,
    vouchers: Vec<PendingVoucher>,
}

/// Open voucher batches, shared by every clone
#[derive(Debug, Clone)]
pub struct VoucherBatcher {
    storage: Arc<dyn NonceStorage>,
    window: Duration,
    max_batch: usize,
    timeout: Duration,
    open: Arc<DashMap<BatchKey, Batch>>,
    next_id: Arc<AtomicU64>,
}

impl VoucherBatcher {
    pub fn new(storage: Arc<dyn NonceStorage>) -> Self {
        Self {
            storage,
            window: DEFAULT_BATCH_WINDOW,
            max_batch: DEFAULT_MAX_BATCH,
            timeout: super::DEFAULT_SETTLEMENT_TIMEOUT,
            open: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Bound on signing, broadcasting and confirming one redemption
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Vouchers waiting in open batches
    pub fn pending(&self) -> usize {
        self.open.iter().map(|batch| batch.vouchers.len()).sum()
    }

    /// Add a claimed voucher to its batch and wait for the redemption
    ///
    /// Fails with [`ErrorReason::Timeout`] at `deadline`; the voucher stays in
    /// its batch and its stored record reflects the eventual outcome.
    pub async fn enqueue(
        &self,
        backend: Arc<dyn SettlementBackend>,
        escrow: Address,
        key: NonceKey,
        voucher: SignedVoucher,
        deadline: Instant,
    ) -> Result<SettleResponse> {
        let batch_key = BatchKey {
            network: key.network,
            pay_to: voucher.to,
        };
        let (reply, receiver) = oneshot::channel();

        let mut opened = false;
        let (id, full) = {
            let mut batch = self.open.entry(batch_key).or_insert_with(|| {
                opened = true;
                Batch {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    escrow,
                    backend,
                    vouchers: Vec::new(),
                }
            });
            batch.vouchers.push(PendingVoucher {
                key,
                voucher,
                reply,
            });
            (batch.id, batch.vouchers.len() >= self.max_batch)
        };
        tracing::debug!(key = %key, batch = id, "Voucher queued for redemption");

        if full {
            if let Some((_, batch)) = self.open.remove_if(&batch_key, |_, batch| batch.id == id) {
                let batcher = self.clone();
                tokio::spawn(async move { batcher.redeem(batch).await });
            }
        } else if opened {
            self.close_after_window(batch_key, id);
        }

        match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(outcome)) => {
                outcome.map_err(|(reason, message)| X402Error::settlement(reason, message))
            }
            Ok(Err(_)) => Err(X402Error::settlement(
                ErrorReason::UnexpectedError,
                "voucher batch was dropped before redemption",
            )),
            Err(_) => Err(X402Error::settlement(
                ErrorReason::Timeout,
                "voucher batch was not redeemed in time",
            )),
        }
    }

    /// Redeem every open batch now, returning how many vouchers they held
    pub async fn flush_all(&self) -> usize {
        let keys: Vec<BatchKey> = self.open.iter().map(|batch| *batch.key()).collect();
        let mut flushed = 0;
        for batch_key in keys {
            if let Some((_, batch)) = self.open.remove(&batch_key) {
                flushed += batch.vouchers.len();
                self.redeem(batch).await;
            }
        }
        flushed
    }

    fn close_after_window(&self, batch_key: BatchKey, id: u64) {
        let batcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(batcher.window).await;
            // Already taken when it filled up or was flushed
            if let Some((_, batch)) = batcher.open.remove_if(&batch_key, |_, batch| batch.id == id) {
                batcher.redeem(batch).await;
            }
        });
    }

    async fn redeem(&self, batch: Batch) {
        let Batch {
            id,
            escrow,
            backend,
            vouchers,
        } = batch;
        let keys: Vec<NonceKey> = vouchers.iter().map(|pending| pending.key).collect();
        let call = SettlementCall::RedeemVouchers {
            escrow,
            vouchers: vouchers.iter().map(|pending| pending.voucher.clone()).collect(),
        };
        tracing::info!(batch = id, escrow = ?escrow, vouchers = keys.len(), "Redeeming voucher batch");

        let deadline = Instant::now() + self.timeout;
        let redeemed = execute(self.storage.as_ref(), backend.as_ref(), &call, &keys, deadline).await;

        for pending in vouchers {
            let outcome = match &redeemed {
                Ok(transaction) => record_settled(self.storage.as_ref(), &pending.key, *transaction)
                    .await
                    .map_err(|e| (e.reason(), e.to_string())),
                Err(e) => Err((e.reason(), e.to_string())),
            };
            // A caller that timed out is gone; its stored record holds the outcome
            let _ = pending.reply.send(outcome);
        }
    }
}
