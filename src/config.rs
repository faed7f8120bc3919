//! Environment-driven facilitator settings
//!
//! Every key is optional except the per-network RPC URL, which is what registers a
//! network in the first place. `<NET>` is the network name upper-cased with `-`
//! replaced by `_` (`base-sepolia` becomes `BASE_SEPOLIA`).
//!
//! | Key | Default |
//! |---|---|
//! | `BIND_ADDRESS` | `0.0.0.0:3000` |
//! | `STORAGE_BACKEND` | `memory` (`memory` or `redis`) |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `REDIS_KEY_PREFIX` | `x402:nonce:` |
//! | `SETTLEMENT_TIMEOUT_SECS` | `30` |
//! | `CONFIRMATION_POLL_MS` | `1000` |
//! | `NONCE_RETENTION_SECS` | `86400` (kept past the authorization's deadline) |
//! | `VOUCHER_BATCH_WINDOW_MS` | `2000` |
//! | `VOUCHER_BATCH_MAX` | `16` |
//! | `RPC_URL_<NET>` | unset: network disabled |
//! | `RELAYER_PRIVATE_KEY_<NET>` | falls back to `RELAYER_PRIVATE_KEY` |
//! | `ESCROW_CONTRACT_<NET>` | unset: no deferred scheme on the network |

use crate::crypto::signature::{parse_address, parse_private_key};
use crate::facilitator::Facilitator;
use crate::facilitator_storage::NonceStorage;
use crate::registry::SchemeRegistry;
use crate::settlement::EvmSettlementBackend;
use crate::types::Network;
use crate::{Result, X402Error};
use ethereum_types::Address;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Where nonce and settlement records live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    Memory,
    Redis {
        url: String,
        key_prefix: Option<String>,
    },
}

/// One settlement network
#[derive(Clone)]
pub struct NetworkSettings {
    pub network: Network,
    pub rpc_url: Url,
    /// Hex private key of the relayer paying gas on this network
    pub relayer_private_key: String,
    pub escrow_contract: Option<Address>,
}

impl std::fmt::Debug for NetworkSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSettings")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("relayer_private_key", &"<redacted>")
            .field("escrow_contract", &self.escrow_contract)
            .finish()
    }
}

/// Complete facilitator configuration
#[derive(Debug, Clone)]
pub struct FacilitatorSettings {
    pub bind_address: String,
    pub storage: StorageSettings,
    pub settlement_timeout: Duration,
    pub confirmation_poll_interval: Duration,
    /// How long a consumed nonce is remembered after its authorization expires
    pub nonce_retention: Duration,
    /// How long a deferred voucher batch stays open
    pub voucher_batch_window: Duration,
    /// Voucher count that redeems a batch early
    pub voucher_batch_max: usize,
    pub networks: Vec<NetworkSettings>,
}

impl Default for FacilitatorSettings {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            storage: StorageSettings::Memory,
            settlement_timeout: crate::settlement::DEFAULT_SETTLEMENT_TIMEOUT,
            confirmation_poll_interval: crate::settlement::evm::DEFAULT_POLL_INTERVAL,
            nonce_retention: crate::settlement::DEFAULT_NONCE_RETENTION,
            voucher_batch_window: crate::settlement::batch::DEFAULT_BATCH_WINDOW,
            voucher_batch_max: crate::settlement::batch::DEFAULT_MAX_BATCH,
            networks: Vec::new(),
        }
    }
}

impl FacilitatorSettings {
    /// Load from the process environment, reading `.env` first when present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup and validate the result
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let storage = match get("STORAGE_BACKEND").as_deref().unwrap_or("memory") {
            "memory" => StorageSettings::Memory,
            "redis" => StorageSettings::Redis {
                url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
                key_prefix: get("REDIS_KEY_PREFIX"),
            },
            other => {
                return Err(X402Error::config(format!(
                    "Unknown STORAGE_BACKEND '{}', expected 'memory' or 'redis'",
                    other
                )))
            }
        };

        let mut networks = Vec::new();
        for network in Network::variants() {
            let suffix = network.env_suffix();
            let Some(rpc_url) = get(&format!("RPC_URL_{}", suffix)) else {
                continue;
            };
            let rpc_url = Url::parse(&rpc_url).map_err(|e| {
                X402Error::config(format!("Invalid RPC_URL_{}: {}", suffix, e))
            })?;
            let relayer_private_key = get(&format!("RELAYER_PRIVATE_KEY_{}", suffix))
                .or_else(|| get("RELAYER_PRIVATE_KEY"))
                .ok_or_else(|| {
                    X402Error::config(format!(
                        "RPC_URL_{} is set but neither RELAYER_PRIVATE_KEY_{} nor RELAYER_PRIVATE_KEY is",
                        suffix, suffix
                    ))
                })?;
            let escrow_contract = match get(&format!("ESCROW_CONTRACT_{}", suffix)) {
                Some(value) => Some(parse_address(&value).ok_or_else(|| {
                    X402Error::config(format!("Invalid ESCROW_CONTRACT_{}: {}", suffix, value))
                })?),
                None => None,
            };

            networks.push(NetworkSettings {
                network: *network,
                rpc_url,
                relayer_private_key,
                escrow_contract,
            });
        }

        let settings = Self {
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            storage,
            settlement_timeout: parse_or(&get, "SETTLEMENT_TIMEOUT_SECS", 30)
                .map(Duration::from_secs)?,
            confirmation_poll_interval: parse_or(&get, "CONFIRMATION_POLL_MS", 1000)
                .map(Duration::from_millis)?,
            nonce_retention: parse_or(&get, "NONCE_RETENTION_SECS", 86_400)
                .map(Duration::from_secs)?,
            voucher_batch_window: parse_or(&get, "VOUCHER_BATCH_WINDOW_MS", 2000)
                .map(Duration::from_millis)?,
            voucher_batch_max: parse_or(&get, "VOUCHER_BATCH_MAX", defaults.voucher_batch_max)?,
            networks,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the facilitator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.settlement_timeout.is_zero() {
            return Err(X402Error::config("SETTLEMENT_TIMEOUT_SECS must be positive"));
        }
        if self.confirmation_poll_interval.is_zero() {
            return Err(X402Error::config("CONFIRMATION_POLL_MS must be positive"));
        }
        if self.voucher_batch_max == 0 {
            return Err(X402Error::config("VOUCHER_BATCH_MAX must be positive"));
        }
        if self.voucher_batch_window >= self.settlement_timeout {
            return Err(X402Error::config(
                "VOUCHER_BATCH_WINDOW_MS must be shorter than SETTLEMENT_TIMEOUT_SECS",
            ));
        }
        for settings in &self.networks {
            if !matches!(settings.rpc_url.scheme(), "http" | "https") {
                return Err(X402Error::config(format!(
                    "RPC URL for {} must be http or https",
                    settings.network
                )));
            }
            parse_private_key(&settings.relayer_private_key).map_err(|_| {
                X402Error::config(format!("Invalid relayer private key for {}", settings.network))
            })?;
        }
        Ok(())
    }

    /// Exact on every configured network, deferred where an escrow is set
    pub fn registry(&self) -> SchemeRegistry {
        self.networks
            .iter()
            .fold(SchemeRegistry::new(), |registry, settings| {
                let registry = registry.with_exact(settings.network);
                match settings.escrow_contract {
                    Some(escrow) => registry.with_deferred(settings.network, escrow),
                    None => registry,
                }
            })
    }

    /// One JSON-RPC backend per configured network
    pub fn backends(&self) -> Result<Vec<EvmSettlementBackend>> {
        self.networks
            .iter()
            .map(|settings| {
                let key = parse_private_key(&settings.relayer_private_key)?;
                Ok(
                    EvmSettlementBackend::new(settings.network, settings.rpc_url.clone(), key)?
                        .with_poll_interval(self.confirmation_poll_interval),
                )
            })
            .collect()
    }

    /// Wire registry, backends and `storage` into a facilitator
    pub fn build_facilitator(&self, storage: Arc<dyn NonceStorage>) -> Result<Facilitator> {
        let builder = Facilitator::builder(self.registry())
            .with_storage(storage)
            .with_settlement_timeout(self.settlement_timeout)
            .with_nonce_retention(self.nonce_retention)
            .with_voucher_batching(self.voucher_batch_window, self.voucher_batch_max);
        let builder = self.backends()?.into_iter().fold(builder, |builder, backend| {
            let network = backend.network();
            builder.with_backend(network, Arc::new(backend))
        });
        Ok(builder.build())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| X402Error::config(format!("Invalid {}: {}", key, value))),
        None => Ok(default),
    }
}
