//! Tests for cryptographic utilities

use super::{eip712, signature};
use ethereum_types::{Address, H256, U256};
use std::str::FromStr;

const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

fn usdc_domain(chain_id: u64) -> eip712::Domain {
    eip712::Domain {
        name: "USD Coin".to_string(),
        version: "2".to_string(),
        chain_id,
        verifying_contract: Address::from_str("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")
            .unwrap(),
    }
}

fn authorization_digest(domain: &eip712::Domain, from: Address, nonce: H256) -> H256 {
    eip712::transfer_with_authorization_hash(
        domain,
        from,
        Address::repeat_byte(0x22),
        U256::from(1_000_000u64),
        U256::from(1_745_323_800u64),
        U256::from(1_745_323_985u64),
        nonce,
    )
}

#[test]
fn test_type_hashes_match_known_values() {
    assert_eq!(
        hex::encode(eip712::keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)"
        )),
        "8b73c3c69bb8fe3d512ecc4cf759cc79239f7b179b0ffacaa9a75d522b39400f"
    );
    assert_eq!(
        hex::encode(eip712::keccak256(
            b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)"
        )),
        "7c7c6cdb67a18743f49ec6fa9b35f50d52ed05cbed4cc592e13b44501c1a2267"
    );
}

#[test]
fn test_sign_and_recover_round_trip() {
    let payer = signature::address_from_secret_key(&signature::parse_private_key(TEST_KEY).unwrap());
    let digest = authorization_digest(&usdc_domain(8453), payer, H256::repeat_byte(7));

    let sig = signature::sign_message_hash(digest, TEST_KEY).unwrap();
    let sig_bytes = hex::decode(sig.trim_start_matches("0x")).unwrap();
    assert_eq!(sig_bytes.len(), 65);
    assert!(sig_bytes[64] == 27 || sig_bytes[64] == 28);

    assert_eq!(signature::recover_address(digest, &sig_bytes).unwrap(), payer);
    assert!(signature::verify_eip712_signature(&sig_bytes, digest, payer).unwrap());
}

#[test]
fn test_recovery_accepts_zero_based_v() {
    let payer = signature::address_from_secret_key(&signature::parse_private_key(TEST_KEY).unwrap());
    let digest = authorization_digest(&usdc_domain(8453), payer, H256::repeat_byte(9));

    let sig = signature::sign_message_hash(digest, TEST_KEY).unwrap();
    let mut sig_bytes = hex::decode(sig.trim_start_matches("0x")).unwrap();
    sig_bytes[64] -= 27;

    assert_eq!(signature::recover_address(digest, &sig_bytes).unwrap(), payer);
}

#[test]
fn test_domain_binds_chain_id() {
    let payer = signature::address_from_secret_key(&signature::parse_private_key(TEST_KEY).unwrap());
    let nonce = H256::repeat_byte(1);
    let base = authorization_digest(&usdc_domain(8453), payer, nonce);
    let avalanche = authorization_digest(&usdc_domain(43114), payer, nonce);
    assert_ne!(base, avalanche);

    // A signature for one chain recovers to a different address on another
    let sig = signature::sign_message_hash(base, TEST_KEY).unwrap();
    let sig_bytes = hex::decode(sig.trim_start_matches("0x")).unwrap();
    let recovered = signature::recover_address(avalanche, &sig_bytes);
    assert!(recovered.map(|addr| addr != payer).unwrap_or(true));
}

#[test]
fn test_deferred_voucher_hash_differs_from_authorization() {
    let escrow = Address::repeat_byte(0x33);
    let domain = eip712::Domain::deferred_escrow(84532, escrow);
    assert_eq!(domain.name, eip712::DEFERRED_DOMAIN_NAME);

    let from = Address::repeat_byte(0x44);
    let to = Address::repeat_byte(0x22);
    let nonce = H256::repeat_byte(5);
    let voucher = eip712::deferred_voucher_hash(&domain, from, to, U256::from(10), U256::from(99), nonce);
    let other = eip712::deferred_voucher_hash(&domain, from, to, U256::from(11), U256::from(99), nonce);
    assert_ne!(voucher, other);
}

#[test]
fn test_malformed_signatures_rejected() {
    let digest = H256::repeat_byte(3);
    assert!(signature::recover_address(digest, &[0u8; 64]).is_err());

    let mut bad_v = [1u8; 65];
    bad_v[64] = 5;
    assert!(signature::recover_address(digest, &bad_v).is_err());

    // r = s = 0 is not a valid signature
    let mut zero = [0u8; 65];
    zero[64] = 27;
    assert!(signature::recover_address(digest, &zero).is_err());
}

#[test]
fn test_checksum_address() {
    // EIP-55 reference vectors
    for expected in [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
    ] {
        let address = Address::from_str(&expected[2..].to_lowercase()).unwrap();
        assert_eq!(signature::to_checksum_address(&address), expected);
    }
}

#[test]
fn test_parse_address() {
    let expected = Address::repeat_byte(0xab);
    assert_eq!(signature::parse_address(&format!("0x{}", "ab".repeat(20))), Some(expected));
    assert_eq!(signature::parse_address(&"AB".repeat(20)), Some(expected));
    assert_eq!(signature::parse_address("0x1234"), None);
    assert_eq!(signature::parse_address(&format!("0x{}", "zz".repeat(20))), None);
}

#[test]
fn test_nonce_generation() {
    let nonce1 = signature::generate_nonce();
    let nonce2 = signature::generate_nonce();
    assert_ne!(nonce1, nonce2);
    assert_eq!(nonce1.as_bytes().len(), 32);
}

#[test]
fn test_invalid_private_key() {
    assert!(signature::parse_private_key("0xzz").is_err());
    assert!(signature::parse_private_key(&format!("0x{}", "00".repeat(32))).is_err());
}
