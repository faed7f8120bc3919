//! Signature utilities

use super::eip712::keccak256;
use crate::{Result, X402Error};
use ethereum_types::{Address, H256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

/// Recover the signer of a 65-byte `r || s || v` signature over a prehashed message
///
/// `v` may be given either as 0/1 or in the Ethereum 27/28 form.
pub fn recover_address(message_hash: H256, signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        return Err(X402Error::invalid_signature("Signature must be 65 bytes"));
    }

    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        _ => return Err(X402Error::invalid_signature("Invalid recovery ID")),
    };
    let recovery_id =
        RecoveryId::try_from(v).map_err(|_| X402Error::invalid_signature("Invalid recovery ID"))?;

    let k256_sig = K256Signature::try_from(&signature[..64])
        .map_err(|_| X402Error::invalid_signature("Invalid signature format"))?;

    let verifying_key =
        VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &k256_sig, recovery_id)
            .map_err(|_| X402Error::invalid_signature("Failed to recover public key"))?;

    Ok(address_from_verifying_key(&verifying_key))
}

/// Verify an EIP-712 signature against an expected signer
pub fn verify_eip712_signature(
    signature: &[u8],
    message_hash: H256,
    expected_address: Address,
) -> Result<bool> {
    Ok(recover_address(message_hash, signature)? == expected_address)
}

/// Parse a hex private key (with or without `0x`)
pub fn parse_private_key(private_key: &str) -> Result<SecretKey> {
    let bytes = hex::decode(private_key.trim_start_matches("0x"))
        .map_err(|_| X402Error::config("Invalid hex private key"))?;
    SecretKey::from_slice(&bytes).map_err(|_| X402Error::config("Invalid private key"))
}

/// Sign a prehashed message, returning the compact signature and recovery id (0/1)
pub fn sign_recoverable(message_hash: H256, secret_key: &SecretKey) -> Result<([u8; 64], u8)> {
    let message = Message::from_digest_slice(message_hash.as_bytes())
        .map_err(|_| X402Error::invalid_signature("Invalid message hash"))?;
    let signature = SECP256K1.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, compact) = signature.serialize_compact();
    Ok((compact, recovery_id.to_i32() as u8))
}

/// Sign a message hash with a private key, producing a 0x-prefixed `r || s || v` (v = 27/28)
pub fn sign_message_hash(message_hash: H256, private_key: &str) -> Result<String> {
    let secret_key = parse_private_key(private_key)?;
    let (compact, recovery_id) = sign_recoverable(message_hash, &secret_key)?;

    let mut sig_bytes = [0u8; 65];
    sig_bytes[..64].copy_from_slice(&compact);
    sig_bytes[64] = recovery_id + 27;

    Ok(format!("0x{}", hex::encode(sig_bytes)))
}

/// Ethereum address controlled by a secret key
pub fn address_from_secret_key(secret_key: &SecretKey) -> Address {
    let public_key = PublicKey::from_secret_key_global(secret_key);
    address_from_uncompressed(&public_key.serialize_uncompressed())
}

fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    address_from_uncompressed(point.as_bytes())
}

/// Keccak the 64-byte public key (without the 0x04 tag) and keep the last 20 bytes
fn address_from_uncompressed(pubkey: &[u8]) -> Address {
    let hash = keccak256(&pubkey[1..]);
    Address::from_slice(&hash[12..])
}

/// Parse a 20-byte hex address, with or without `0x`; any letter case is accepted
pub fn parse_address(value: &str) -> Option<Address> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.len() != 40 {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    Some(Address::from_slice(&bytes))
}

/// Render an address with its EIP-55 mixed-case checksum
pub fn to_checksum_address(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Generate a random nonce for an authorization
#[cfg(test)]
pub fn generate_nonce() -> H256 {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    H256::from_slice(&bytes)
}
