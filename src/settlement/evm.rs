//! EVM settlement over raw JSON-RPC
//!
//! The relayer signs EIP-155 legacy transactions locally and broadcasts them with
//! `eth_sendRawTransaction`; no node-side account is needed. The transaction hash
//! is the keccak of the signed RLP, known before anything is sent.

use super::{PreparedTransaction, SettlementBackend, SettlementCall, SignedVoucher, SplitSignature};
use crate::crypto::eip712::{encode_address, encode_uint, keccak256};
use crate::crypto::signature::{address_from_secret_key, sign_recoverable};
use crate::types::{ErrorReason, Network};
use crate::{Result, X402Error};
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use reqwest::Client;
use rlp::RlpStream;
use secp256k1::SecretKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

const TRANSFER_WITH_AUTHORIZATION: &str =
    "transferWithAuthorization(address,address,uint256,uint256,uint256,bytes32,uint8,bytes32,bytes32)";
const REDEEM_VOUCHERS: &str =
    "redeemVouchers((address,address,uint256,uint256,bytes32,uint8,bytes32,bytes32)[])";

/// Default interval between receipt polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Extra gas over the node's estimate, in percent
const GAS_MARGIN_PERCENT: u64 = 20;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Settlement backend for one EVM network
#[derive(Debug)]
pub struct EvmSettlementBackend {
    network: Network,
    client: Client,
    rpc_url: Url,
    relayer_key: SecretKey,
    relayer: Address,
    poll_interval: Duration,
    request_id: AtomicU64,
}

impl EvmSettlementBackend {
    /// Create a backend relaying from the account of `relayer_key`
    pub fn new(network: Network, rpc_url: Url, relayer_key: SecretKey) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| X402Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            network,
            client,
            rpc_url,
            relayer: address_from_secret_key(&relayer_key),
            relayer_key,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Address paying gas for settlements
    pub fn relayer(&self) -> Address {
        self.relayer
    }

    pub fn network(&self) -> Network {
        self.network
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        tracing::debug!(network = %self.network, method, "JSON-RPC request");

        let response = self
            .client
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let response_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            tracing::error!(
                "JSON-RPC {} failed with status: {}. Response body: {}",
                method,
                status,
                response_body
            );
            return Err(X402Error::rpc(format!(
                "{} failed with status: {}",
                method, status
            )));
        }

        let response: RpcResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(X402Error::rpc(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }
        Ok(response.result)
    }

    /// Call a method whose result is a hex quantity or hash
    async fn rpc_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let result = self.rpc(method, params).await?;
        if result.is_null() {
            return Err(X402Error::rpc(format!("{} returned no result", method)));
        }
        Ok(serde_json::from_value(result)?)
    }

    fn sign_transaction(&self, tx: &LegacyTransaction) -> Result<Vec<u8>> {
        let chain_id = self.network.chain_id();

        let mut unsigned = RlpStream::new_list(9);
        tx.append_fields(&mut unsigned);
        unsigned.append(&chain_id).append(&0u8).append(&0u8);
        let hash = H256(keccak256(&unsigned.out()));

        let (compact, recovery_id) = sign_recoverable(hash, &self.relayer_key)?;
        let v = u64::from(recovery_id) + chain_id * 2 + 35;

        let mut signed = RlpStream::new_list(9);
        tx.append_fields(&mut signed);
        signed
            .append(&v)
            .append(&U256::from_big_endian(&compact[..32]))
            .append(&U256::from_big_endian(&compact[32..]));
        Ok(signed.out().to_vec())
    }
}

#[async_trait]
impl SettlementBackend for EvmSettlementBackend {
    async fn prepare(&self, call: &SettlementCall) -> Result<PreparedTransaction> {
        let to = call.target();
        let data = encode_call(call);
        let relayer = format!("{:#x}", self.relayer);

        let estimate: U256 = self
            .rpc_typed(
                "eth_estimateGas",
                json!([{
                    "from": relayer,
                    "to": format!("{:#x}", to),
                    "data": format!("0x{}", hex::encode(&data)),
                }]),
            )
            .await
            .map_err(|e| match e {
                X402Error::Rpc { message } if message.contains("revert") => {
                    X402Error::settlement(ErrorReason::TransactionReverted, message)
                }
                other => other,
            })?;
        let gas = estimate + estimate * U256::from(GAS_MARGIN_PERCENT) / U256::from(100u64);

        let gas_price: U256 = self.rpc_typed("eth_gasPrice", json!([])).await?;
        let nonce: U256 = self
            .rpc_typed("eth_getTransactionCount", json!([relayer, "pending"]))
            .await?;
        let balance: U256 = self
            .rpc_typed("eth_getBalance", json!([relayer, "latest"]))
            .await?;

        let cost = gas.saturating_mul(gas_price);
        if balance < cost {
            return Err(X402Error::settlement(
                ErrorReason::InsufficientRelayerBalance,
                format!(
                    "relayer {} holds {} wei, settlement needs up to {}",
                    relayer, balance, cost
                ),
            ));
        }

        let raw = self.sign_transaction(&LegacyTransaction {
            nonce,
            gas_price,
            gas,
            to,
            value: U256::zero(),
            data,
        })?;
        let hash = H256(keccak256(&raw));
        tracing::debug!(
            network = %self.network,
            transaction = ?hash,
            relayer_nonce = %nonce,
            "Signed settlement transaction"
        );
        Ok(PreparedTransaction { hash, raw })
    }

    async fn broadcast(&self, transaction: &PreparedTransaction) -> Result<()> {
        let sent: Result<H256> = self
            .rpc_typed(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(&transaction.raw))]),
            )
            .await;

        match sent {
            Ok(hash) => {
                if hash != transaction.hash {
                    tracing::warn!(
                        network = %self.network,
                        expected = ?transaction.hash,
                        reported = ?hash,
                        "Node reported a different transaction hash"
                    );
                }
                tracing::info!(
                    network = %self.network,
                    transaction = ?transaction.hash,
                    relayer = ?self.relayer,
                    "Broadcast settlement transaction"
                );
                Ok(())
            }
            Err(X402Error::Rpc { message }) if is_known_transaction(&message) => {
                tracing::debug!(network = %self.network, transaction = ?transaction.hash, "Transaction already known");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn confirm(&self, transaction: H256) -> Result<()> {
        let hash = format!("{:#x}", transaction);
        loop {
            let receipt = self
                .rpc("eth_getTransactionReceipt", json!([hash]))
                .await?;

            if let Some(status) = receipt.get("status").and_then(Value::as_str) {
                if status == "0x1" {
                    tracing::info!(network = %self.network, transaction = %hash, "Settlement confirmed");
                    return Ok(());
                }
                return Err(X402Error::settlement(
                    ErrorReason::TransactionReverted,
                    format!("transaction {} reverted with status {}", hash, status),
                ));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Pre-EIP-1559 transaction, signed with EIP-155 replay protection
#[derive(Debug, Clone, PartialEq, Eq)]
struct LegacyTransaction {
    nonce: U256,
    gas_price: U256,
    gas: U256,
    to: Address,
    value: U256,
    data: Vec<u8>,
}

impl LegacyTransaction {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream
            .append(&self.nonce)
            .append(&self.gas_price)
            .append(&self.gas)
            .append(&self.to)
            .append(&self.value)
            .append(&self.data);
    }
}

/// Node errors meaning the transaction is already in its pool
fn is_known_transaction(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

/// First four bytes of the keccak of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI-encode the calldata of a settlement call
pub fn encode_call(call: &SettlementCall) -> Vec<u8> {
    match call {
        SettlementCall::TransferWithAuthorization {
            from,
            to,
            value,
            valid_after,
            valid_before,
            nonce,
            signature,
            ..
        } => {
            let mut data = Vec::with_capacity(4 + 32 * 9);
            data.extend_from_slice(&selector(TRANSFER_WITH_AUTHORIZATION));
            data.extend_from_slice(&encode_address(*from));
            data.extend_from_slice(&encode_address(*to));
            data.extend_from_slice(&encode_uint(*value));
            data.extend_from_slice(&encode_uint(*valid_after));
            data.extend_from_slice(&encode_uint(*valid_before));
            data.extend_from_slice(nonce.as_bytes());
            append_signature(&mut data, signature);
            data
        }
        SettlementCall::RedeemVouchers { vouchers, .. } => {
            let mut data = Vec::with_capacity(4 + 32 * (2 + 8 * vouchers.len()));
            data.extend_from_slice(&selector(REDEEM_VOUCHERS));
            // Single dynamic argument: offset, then length, then static tuples inline
            data.extend_from_slice(&encode_uint(U256::from(32u64)));
            data.extend_from_slice(&encode_uint(U256::from(vouchers.len())));
            for voucher in vouchers {
                append_voucher(&mut data, voucher);
            }
            data
        }
    }
}

fn append_voucher(data: &mut Vec<u8>, voucher: &SignedVoucher) {
    data.extend_from_slice(&encode_address(voucher.from));
    data.extend_from_slice(&encode_address(voucher.to));
    data.extend_from_slice(&encode_uint(voucher.value));
    data.extend_from_slice(&encode_uint(voucher.expiry));
    data.extend_from_slice(voucher.nonce.as_bytes());
    append_signature(data, &voucher.signature);
}

fn append_signature(data: &mut Vec<u8>, signature: &SplitSignature) {
    data.extend_from_slice(&encode_uint(U256::from(signature.v)));
    data.extend_from_slice(signature.r.as_bytes());
    data.extend_from_slice(signature.s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signature::{parse_private_key, recover_address};
    use mockito::{Matcher, Server, ServerGuard};

    const RELAYER_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn backend_at(url: &str) -> EvmSettlementBackend {
        EvmSettlementBackend::new(
            Network::BaseSepolia,
            Url::parse(url).unwrap(),
            parse_private_key(RELAYER_KEY).unwrap(),
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
    }

    fn backend(server: &ServerGuard) -> EvmSettlementBackend {
        backend_at(&server.url())
    }

    fn transfer_call() -> SettlementCall {
        SettlementCall::TransferWithAuthorization {
            asset: Address::repeat_byte(0xaa),
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            value: U256::from(1_000_000u64),
            valid_after: U256::zero(),
            valid_before: U256::from(u32::MAX),
            nonce: H256::repeat_byte(0x03),
            signature: SplitSignature {
                v: 27,
                r: H256::repeat_byte(0x04),
                s: H256::repeat_byte(0x05),
            },
        }
    }

    async fn mock_result(server: &mut ServerGuard, method: &str, result: Value) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": method })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
            .create_async()
            .await
    }

    async fn mock_chain_state(server: &mut ServerGuard, balance: &str) -> Vec<mockito::Mock> {
        vec![
            mock_result(server, "eth_estimateGas", json!("0x186a0")).await,
            mock_result(server, "eth_gasPrice", json!("0x3b9aca00")).await,
            mock_result(server, "eth_getTransactionCount", json!("0x7")).await,
            mock_result(server, "eth_getBalance", json!(balance)).await,
        ]
    }

    #[test]
    fn test_transfer_with_authorization_encoding() {
        assert_eq!(hex::encode(selector(TRANSFER_WITH_AUTHORIZATION)), "e3ee160e");

        let data = encode_call(&transfer_call());
        assert_eq!(data.len(), 4 + 32 * 9);
        assert_eq!(&data[4 + 12..4 + 32], Address::repeat_byte(0x01).as_bytes());
        assert_eq!(U256::from_big_endian(&data[4 + 64..4 + 96]), U256::from(1_000_000u64));
        assert_eq!(U256::from_big_endian(&data[4 + 192..4 + 224]), U256::from(27));
    }

    #[test]
    fn test_redeem_vouchers_encoding() {
        let voucher = SignedVoucher {
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            value: U256::from(250),
            expiry: U256::from(1_745_323_985u64),
            nonce: H256::repeat_byte(0x03),
            signature: SplitSignature {
                v: 28,
                r: H256::repeat_byte(0x04),
                s: H256::repeat_byte(0x05),
            },
        };
        let call = SettlementCall::RedeemVouchers {
            escrow: Address::repeat_byte(0xee),
            vouchers: vec![voucher.clone(), voucher],
        };

        let data = encode_call(&call);
        assert_eq!(data.len(), 4 + 32 * (2 + 16));
        assert_eq!(&data[..4], &selector(REDEEM_VOUCHERS));
        assert_eq!(U256::from_big_endian(&data[4..36]), U256::from(32));
        assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(2));
        assert_eq!(U256::from_big_endian(&data[68 + 64..68 + 96]), U256::from(250));
    }

    #[test]
    fn test_signed_transaction_recovers_relayer() {
        let backend = backend_at("http://127.0.0.1:8545");
        let tx = LegacyTransaction {
            nonce: U256::from(7),
            gas_price: U256::from(1_000_000_000u64),
            gas: U256::from(120_000u64),
            to: Address::repeat_byte(0xaa),
            value: U256::zero(),
            data: encode_call(&transfer_call()),
        };

        let raw = backend.sign_transaction(&tx).unwrap();
        let decoded = rlp::Rlp::new(&raw);
        assert_eq!(decoded.item_count().unwrap(), 9);

        let chain_id = Network::BaseSepolia.chain_id();
        let v: u64 = decoded.val_at(6).unwrap();
        assert!(v == chain_id * 2 + 35 || v == chain_id * 2 + 36);

        let r: U256 = decoded.val_at(7).unwrap();
        let s: U256 = decoded.val_at(8).unwrap();
        let mut signature = [0u8; 65];
        r.to_big_endian(&mut signature[..32]);
        s.to_big_endian(&mut signature[32..64]);
        signature[64] = (v - chain_id * 2 - 35) as u8;

        let mut unsigned = RlpStream::new_list(9);
        tx.append_fields(&mut unsigned);
        unsigned.append(&chain_id).append(&0u8).append(&0u8);
        let hash = H256(keccak256(&unsigned.out()));

        assert_eq!(recover_address(hash, &signature).unwrap(), backend.relayer());
    }

    async fn mock_send(server: &mut ServerGuard, raw: &[u8], body: Value) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_sendRawTransaction",
                "params": [format!("0x{}", hex::encode(raw))],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_prepare_signs_without_broadcasting() {
        let mut server = Server::new_async().await;
        let _state = mock_chain_state(&mut server, "0xde0b6b3a7640000").await;
        let send = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "eth_sendRawTransaction" })))
            .expect(0)
            .create_async()
            .await;

        let prepared = backend(&server).prepare(&transfer_call()).await.unwrap();
        assert_eq!(prepared.hash, H256(keccak256(&prepared.raw)));

        let decoded = rlp::Rlp::new(&prepared.raw);
        let nonce: U256 = decoded.val_at(0).unwrap();
        let gas: U256 = decoded.val_at(2).unwrap();
        let to: Address = decoded.val_at(3).unwrap();
        assert_eq!(nonce, U256::from(7));
        assert_eq!(gas, U256::from(120_000u64));
        assert_eq!(to, Address::repeat_byte(0xaa));
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_broadcast_sends_prepared_bytes() {
        let mut server = Server::new_async().await;
        let raw = vec![0xf8, 0x6b, 0x07];
        let hash = H256(keccak256(&raw));
        let send = mock_send(
            &mut server,
            &raw,
            json!({ "jsonrpc": "2.0", "id": 1, "result": format!("{:#x}", hash) }),
        )
        .await;

        let prepared = PreparedTransaction { hash, raw };
        backend(&server).broadcast(&prepared).await.unwrap();
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_broadcast_of_known_transaction_succeeds() {
        let mut server = Server::new_async().await;
        let raw = vec![0xf8, 0x6b, 0x08];
        let _send = mock_send(
            &mut server,
            &raw,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "already known" }
            }),
        )
        .await;

        let prepared = PreparedTransaction {
            hash: H256(keccak256(&raw)),
            raw,
        };
        assert!(backend(&server).broadcast(&prepared).await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_rejection_is_rpc_error() {
        let mut server = Server::new_async().await;
        let raw = vec![0xf8, 0x6b, 0x09];
        let _send = mock_send(
            &mut server,
            &raw,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "nonce too low" }
            }),
        )
        .await;

        let prepared = PreparedTransaction {
            hash: H256(keccak256(&raw)),
            raw,
        };
        let err = backend(&server).broadcast(&prepared).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::RpcError);
    }

    #[tokio::test]
    async fn test_prepare_insufficient_relayer_balance() {
        let mut server = Server::new_async().await;
        let _state = mock_chain_state(&mut server, "0x10").await;

        let err = backend(&server).prepare(&transfer_call()).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::InsufficientRelayerBalance);
    }

    #[tokio::test]
    async fn test_prepare_reverting_call() {
        let mut server = Server::new_async().await;
        let _estimate = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "eth_estimateGas" })))
            .with_status(200)
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": 3, "message": "execution reverted: FiatTokenV2: invalid signature" }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = backend(&server).prepare(&transfer_call()).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::TransactionReverted);
    }

    #[tokio::test]
    async fn test_rpc_http_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(502)
            .create_async()
            .await;

        let err = backend(&server).prepare(&transfer_call()).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::RpcError);
    }

    #[tokio::test]
    async fn test_confirm_receipt_status() {
        let mut server = Server::new_async().await;
        let _receipt = mock_result(
            &mut server,
            "eth_getTransactionReceipt",
            json!({ "status": "0x1", "blockNumber": "0x10" }),
        )
        .await;
        assert!(backend(&server).confirm(H256::repeat_byte(1)).await.is_ok());

        let mut server = Server::new_async().await;
        let _receipt = mock_result(
            &mut server,
            "eth_getTransactionReceipt",
            json!({ "status": "0x0", "blockNumber": "0x10" }),
        )
        .await;
        let err = backend(&server).confirm(H256::repeat_byte(1)).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::TransactionReverted);
    }
}
