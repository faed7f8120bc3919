//! Storage trait for facilitator nonce tracking
//!
//! Every authorization is keyed by `(network, from, nonce)`. A key moves through
//! [`SettlementRecord::Claimed`], [`SettlementRecord::Submitted`] and
//! [`SettlementRecord::Settled`]; the presence of any record means the nonce is
//! consumed for replay purposes. The claim is an atomic insert-if-absent so two
//! facilitator processes sharing a backend cannot both submit the same transfer.
//!
//! A record carries the Unix second after which it may be dropped. The dispatcher
//! sets it past the authorization's own deadline, so a key is never forgotten while
//! its signature could still be executed.

use crate::types::{Network, SettleResponse};
use crate::Result;
use async_trait::async_trait;
use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Replay key of one authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonceKey {
    pub network: Network,
    pub from: Address,
    pub nonce: H256,
}

impl NonceKey {
    pub fn new(network: Network, from: Address, nonce: H256) -> Self {
        Self {
            network,
            from,
            nonce,
        }
    }
}

impl fmt::Display for NonceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:0x{}:0x{}",
            self.network,
            hex::encode(self.from.as_bytes()),
            hex::encode(self.nonce.as_bytes())
        )
    }
}

/// Progress of a settlement for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SettlementRecord {
    /// Reserved by a settle call; nothing signed for broadcast yet
    Claimed,
    /// Transaction signed and handed to the node, confirmation pending
    ///
    /// `raw` is the signed transaction, kept so a retry can broadcast it again.
    Submitted {
        transaction: H256,
        #[serde(with = "hex_bytes")]
        raw: Vec<u8>,
    },
    /// Final result, replayed to every later settle call
    Settled { response: SettleResponse },
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        hex::decode(value.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

/// Trait for storing and retrieving nonce information
///
/// Implementations must make [`NonceStorage::claim_nonce`] atomic: of two
/// concurrent claims for the same key exactly one returns `true`.
#[async_trait]
pub trait NonceStorage: Send + Sync + fmt::Debug {
    /// Current record for a key
    async fn settlement(&self, key: &NonceKey) -> Result<Option<SettlementRecord>>;

    /// Check if a nonce has been consumed
    async fn has_nonce(&self, key: &NonceKey) -> Result<bool> {
        Ok(self.settlement(key).await?.is_some())
    }

    /// Insert [`SettlementRecord::Claimed`] if the key is free; `false` if it was taken
    ///
    /// `expires_at` is the Unix second after which the key may be forgotten;
    /// `None` keeps it forever.
    async fn claim_nonce(&self, key: &NonceKey, expires_at: Option<u64>) -> Result<bool>;

    /// Overwrite the record of a claimed key, keeping the claim's expiry
    async fn record(&self, key: &NonceKey, record: SettlementRecord) -> Result<()>;

    /// Release a key so the authorization may be settled again
    async fn remove_nonce(&self, key: &NonceKey) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: SettlementRecord,
    expires_at: Option<u64>,
}

/// In-memory storage implementation
///
/// Data is lost when the server restarts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    records: Arc<RwLock<HashMap<NonceKey, StoredRecord>>>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records whose expiry is at or before `now` (Unix seconds),
    /// returning how many were removed
    pub async fn purge_expired(&self, now: u64) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, stored| stored.expires_at.map_or(true, |at| at > now));
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl NonceStorage for InMemoryStorage {
    async fn settlement(&self, key: &NonceKey) -> Result<Option<SettlementRecord>> {
        let records = self.records.read().await;
        Ok(records.get(key).map(|stored| stored.record.clone()))
    }

    async fn claim_nonce(&self, key: &NonceKey, expires_at: Option<u64>) -> Result<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(
            *key,
            StoredRecord {
                record: SettlementRecord::Claimed,
                expires_at,
            },
        );
        Ok(true)
    }

    async fn record(&self, key: &NonceKey, record: SettlementRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(stored) => stored.record = record,
            None => {
                records.insert(
                    *key,
                    StoredRecord {
                        record,
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn remove_nonce(&self, key: &NonceKey) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }
}


#[cfg(feature = "redis")]
pub mod redis_storage {
    use super::{NonceKey, NonceStorage, Result, SettlementRecord};
    use crate::X402Error;
    use redis::{aio::MultiplexedConnection, AsyncCommands, Client};

    /// Latest expiry handed to `EXAT` (end of year 9999); later keys never expire
    const MAX_EXPIRE_AT: u64 = 253_402_300_799;

    /// Redis-based storage implementation
    ///
    /// Records survive restarts and are shared between facilitator instances.
    /// A claim expires at its own `EXAT` timestamp and later writes keep it.
    #[derive(Debug, Clone)]
    pub struct RedisStorage {
        client: Client,
        key_prefix: String,
    }

    impl RedisStorage {
        /// Create a new Redis storage instance
        ///
        /// # Arguments
        ///
        /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
        /// * `key_prefix` - Optional prefix for Redis keys (default: "x402:nonce:")
        pub async fn new(redis_url: &str, key_prefix: Option<&str>) -> Result<Self> {
            let client = Client::open(redis_url)
                .map_err(|e| X402Error::config(format!("Failed to connect to Redis: {}", e)))?;

            let key_prefix = key_prefix.unwrap_or("x402:nonce:").to_string();

            Ok(Self { client, key_prefix })
        }

        fn make_key(&self, key: &NonceKey) -> String {
            format!("{}{}", self.key_prefix, key)
        }

        async fn connection(&self) -> Result<MultiplexedConnection> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| X402Error::storage(format!("Failed to get Redis connection: {}", e)))
        }
    }

    #[async_trait::async_trait]
    impl NonceStorage for RedisStorage {
        async fn settlement(&self, key: &NonceKey) -> Result<Option<SettlementRecord>> {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn
                .get(self.make_key(key))
                .await
                .map_err(|e| X402Error::storage(format!("Redis GET command failed: {}", e)))?;
            value
                .map(|json| serde_json::from_str(&json).map_err(X402Error::from))
                .transpose()
        }

        async fn claim_nonce(&self, key: &NonceKey, expires_at: Option<u64>) -> Result<bool> {
            let mut conn = self.connection().await?;
            let value = serde_json::to_string(&SettlementRecord::Claimed)?;

            let mut command = redis::cmd("SET");
            command.arg(self.make_key(key)).arg(value).arg("NX");
            if let Some(at) = expires_at.filter(|at| *at <= MAX_EXPIRE_AT) {
                command.arg("EXAT").arg(at);
            }
            // SET NX replies OK when the key was free, nil otherwise
            let reply: Option<String> = command
                .query_async(&mut conn)
                .await
                .map_err(|e| X402Error::storage(format!("Redis SET NX command failed: {}", e)))?;
            Ok(reply.is_some())
        }

        async fn record(&self, key: &NonceKey, record: SettlementRecord) -> Result<()> {
            let mut conn = self.connection().await?;
            let value = serde_json::to_string(&record)?;
            redis::cmd("SET")
                .arg(self.make_key(key))
                .arg(value)
                .arg("KEEPTTL")
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| X402Error::storage(format!("Redis SET command failed: {}", e)))
        }

        async fn remove_nonce(&self, key: &NonceKey) -> Result<()> {
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(self.make_key(key))
                .await
                .map_err(|e| X402Error::storage(format!("Redis DEL command failed: {}", e)))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::types::Network;
        use ethereum_types::{Address, H256};
        use std::env;

        /// Tests are skipped when Redis is not reachable
        async fn available_storage() -> Option<RedisStorage> {
            let redis_url =
                env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
            let prefix = format!("test:{}:", uuid::Uuid::new_v4());
            let storage = RedisStorage::new(&redis_url, Some(&prefix)).await.ok()?;
            match storage.connection().await {
                Ok(_) => Some(storage),
                Err(_) => {
                    println!("Skipping Redis test: Redis not available at {}", redis_url);
                    None
                }
            }
        }

        fn key(byte: u8) -> NonceKey {
            NonceKey::new(Network::Base, Address::repeat_byte(0x22), H256::repeat_byte(byte))
        }

        #[tokio::test]
        async fn test_redis_storage_default_prefix() {
            let storage = RedisStorage::new("redis://localhost:6379", None).await.unwrap();
            assert_eq!(storage.key_prefix, "x402:nonce:");
        }

        #[tokio::test]
        async fn test_redis_storage_claim_is_exclusive() {
            let Some(storage) = available_storage().await else {
                return;
            };
            let key = key(1);

            assert!(!storage.has_nonce(&key).await.unwrap());
            assert!(storage.claim_nonce(&key, None).await.unwrap());
            assert!(!storage.claim_nonce(&key, None).await.unwrap());
            assert_eq!(
                storage.settlement(&key).await.unwrap(),
                Some(SettlementRecord::Claimed)
            );

            storage.remove_nonce(&key).await.unwrap();
            assert!(!storage.has_nonce(&key).await.unwrap());
        }

        #[tokio::test]
        async fn test_redis_storage_expiry_survives_record() {
            let Some(storage) = available_storage().await else {
                return;
            };
            let key = key(2);
            let expires_at = chrono::Utc::now().timestamp() as u64 + 120;
            assert!(storage.claim_nonce(&key, Some(expires_at)).await.unwrap());
            storage
                .record(
                    &key,
                    SettlementRecord::Submitted {
                        transaction: H256::repeat_byte(9),
                        raw: vec![0xf8, 0x09],
                    },
                )
                .await
                .unwrap();

            let mut conn = storage.connection().await.unwrap();
            let ttl: i64 = conn.ttl(storage.make_key(&key)).await.unwrap();
            assert!(ttl > 60 && ttl <= 120);

            storage.remove_nonce(&key).await.unwrap();
        }

        #[tokio::test]
        async fn test_redis_storage_far_deadline_never_expires() {
            let Some(storage) = available_storage().await else {
                return;
            };
            let key = key(3);
            assert!(storage.claim_nonce(&key, Some(u64::MAX)).await.unwrap());

            let mut conn = storage.connection().await.unwrap();
            let ttl: i64 = conn.ttl(storage.make_key(&key)).await.unwrap();
            assert_eq!(ttl, -1);

            storage.remove_nonce(&key).await.unwrap();
        }
    }
}
