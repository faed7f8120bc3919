//! EIP-712 typed data hashing for the structs the facilitator verifies

use ethereum_types::{Address, H256, U256};

/// Encoded EIP-712 domain type
const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// EIP-3009 struct signed by exact-scheme payers
const TRANSFER_WITH_AUTHORIZATION_TYPE: &[u8] = b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)";

/// Voucher struct signed by deferred-scheme payers
const DEFERRED_VOUCHER_TYPE: &[u8] =
    b"DeferredVoucher(address from,address to,uint256 value,uint256 expiry,bytes32 nonce)";

/// Domain name of the escrow contract that redeems deferred vouchers
pub const DEFERRED_DOMAIN_NAME: &str = "x402 Deferred Escrow";
/// Domain version of the escrow contract that redeems deferred vouchers
pub const DEFERRED_DOMAIN_VERSION: &str = "1";

/// EIP-712 domain separator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Domain {
    /// Domain of a deferred escrow contract
    pub fn deferred_escrow(chain_id: u64, escrow: Address) -> Self {
        Self {
            name: DEFERRED_DOMAIN_NAME.to_string(),
            version: DEFERRED_DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract: escrow,
        }
    }

    /// Hash the domain separator
    pub fn separator(&self) -> H256 {
        let mut data = Vec::with_capacity(32 * 5);
        data.extend_from_slice(&keccak256(DOMAIN_TYPE));
        data.extend_from_slice(&keccak256(self.name.as_bytes()));
        data.extend_from_slice(&keccak256(self.version.as_bytes()));
        data.extend_from_slice(&encode_uint(U256::from(self.chain_id)));
        data.extend_from_slice(&encode_address(self.verifying_contract));
        H256(keccak256(&data))
    }
}

/// Digest a payer signs for an EIP-3009 `transferWithAuthorization`
pub fn transfer_with_authorization_hash(
    domain: &Domain,
    from: Address,
    to: Address,
    value: U256,
    valid_after: U256,
    valid_before: U256,
    nonce: H256,
) -> H256 {
    let mut data = Vec::with_capacity(32 * 7);
    data.extend_from_slice(&keccak256(TRANSFER_WITH_AUTHORIZATION_TYPE));
    data.extend_from_slice(&encode_address(from));
    data.extend_from_slice(&encode_address(to));
    data.extend_from_slice(&encode_uint(value));
    data.extend_from_slice(&encode_uint(valid_after));
    data.extend_from_slice(&encode_uint(valid_before));
    data.extend_from_slice(nonce.as_bytes());
    signing_hash(domain, H256(keccak256(&data)))
}

/// Digest a payer signs for a deferred voucher
pub fn deferred_voucher_hash(
    domain: &Domain,
    from: Address,
    to: Address,
    value: U256,
    expiry: U256,
    nonce: H256,
) -> H256 {
    let mut data = Vec::with_capacity(32 * 6);
    data.extend_from_slice(&keccak256(DEFERRED_VOUCHER_TYPE));
    data.extend_from_slice(&encode_address(from));
    data.extend_from_slice(&encode_address(to));
    data.extend_from_slice(&encode_uint(value));
    data.extend_from_slice(&encode_uint(expiry));
    data.extend_from_slice(nonce.as_bytes());
    signing_hash(domain, H256(keccak256(&data)))
}

/// EIP-712: `keccak256(0x1901 || domain_separator || struct_hash)`
pub fn signing_hash(domain: &Domain, struct_hash: H256) -> H256 {
    let mut data = Vec::with_capacity(66);
    data.extend_from_slice(&[0x19, 0x01]);
    data.extend_from_slice(domain.separator().as_bytes());
    data.extend_from_slice(struct_hash.as_bytes());
    H256(keccak256(&data))
}

/// Keccak-256 hash function
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    Keccak256::digest(data).into()
}

/// ABI-encode an address as a left-padded 32-byte word
pub fn encode_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// ABI-encode an unsigned integer as a big-endian 32-byte word
pub fn encode_uint(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}
