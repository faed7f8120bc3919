//! Structural validation of an inbound payment against its requirements
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. protocol version
//! 2. scheme is offered and equals the requirements' scheme
//! 3. network equals the requirements' network
//! 4. the (scheme, network) pair is offered here
//! 5. the requirements name the asset registered for the network
//! 6. payload fields are present and well typed
//! 7. amount is within `maxAmountRequired`
//! 8. recipient equals `payTo`
//!
//! No signature math happens here; see [`crate::verifier`].

use crate::crypto::eip712::Domain;
use crate::crypto::signature::parse_address;
use crate::facilitator_storage::NonceKey;
use crate::registry::SchemeRegistry;
use crate::types::{
    ErrorReason, FacilitatorRequest, Network, PaymentPayload, PaymentRequirements, Scheme,
    SchemePayload, X402_VERSION,
};
use crate::{Result, X402Error};
use ethereum_types::{Address, H256, U256};

/// A payment that passed structural validation, with every field typed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPayment {
    pub network: Network,
    pub scheme: Scheme,
    pub asset: Address,
    pub pay_to: Address,
    pub max_amount: U256,
    /// Domain the payer's signature must be bound to
    pub domain: Domain,
    pub authorization: Authorization,
}

/// Typed scheme-specific authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Exact(ExactAuthorization),
    Deferred(DeferredAuthorization),
}

/// EIP-3009 `transferWithAuthorization` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: H256,
    pub signature: Vec<u8>,
}

/// Deferred voucher fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub expiry: U256,
    pub nonce: H256,
    pub signature: Vec<u8>,
}

impl ValidatedPayment {
    /// Address the authorization claims to pay from
    pub fn payer(&self) -> Address {
        match &self.authorization {
            Authorization::Exact(auth) => auth.from,
            Authorization::Deferred(voucher) => voucher.from,
        }
    }

    pub fn value(&self) -> U256 {
        match &self.authorization {
            Authorization::Exact(auth) => auth.value,
            Authorization::Deferred(voucher) => voucher.value,
        }
    }

    pub fn nonce(&self) -> H256 {
        match &self.authorization {
            Authorization::Exact(auth) => auth.nonce,
            Authorization::Deferred(voucher) => voucher.nonce,
        }
    }

    /// Unix second from which the authorization can no longer be executed
    pub fn deadline(&self) -> U256 {
        match &self.authorization {
            Authorization::Exact(auth) => auth.valid_before,
            Authorization::Deferred(voucher) => voucher.expiry,
        }
    }

    /// Replay and idempotency key `(network, from, nonce)`
    pub fn nonce_key(&self) -> NonceKey {
        NonceKey::new(self.network, self.payer(), self.nonce())
    }
}

/// Validate a facilitator request, including its envelope version
pub fn validate_request(
    registry: &SchemeRegistry,
    request: &FacilitatorRequest,
) -> Result<ValidatedPayment> {
    if request.x402_version != X402_VERSION {
        return Err(X402Error::rejected(ErrorReason::UnsupportedVersion));
    }
    validate(
        registry,
        &request.payment_payload,
        &request.payment_requirements,
    )
}

/// Validate a payment payload against the requirements it claims to satisfy
pub fn validate(
    registry: &SchemeRegistry,
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<ValidatedPayment> {
    if payload.x402_version != X402_VERSION {
        return Err(reject(ErrorReason::UnsupportedVersion));
    }

    let scheme = Scheme::from_name(&payload.scheme)
        .filter(|scheme| registry.knows_scheme(*scheme))
        .filter(|_| payload.scheme == requirements.scheme)
        .ok_or_else(|| reject(ErrorReason::UnsupportedScheme))?;

    if payload.network != requirements.network {
        return Err(reject(ErrorReason::NetworkMismatch));
    }

    let network = Network::from_name(&payload.network)
        .filter(|network| registry.supports(scheme, *network))
        .ok_or_else(|| reject(ErrorReason::UnsupportedNetwork))?;

    let asset = registry
        .asset_for(network)
        .filter(|asset| parse_address(&requirements.asset) == Some(*asset))
        .ok_or_else(|| reject(ErrorReason::UnsupportedAsset))?;

    let pay_to = parse_address(&requirements.pay_to).ok_or_else(invalid_payload)?;
    let max_amount = parse_amount(&requirements.max_amount_required)?;

    let (authorization, domain) = match (&payload.payload, scheme) {
        (SchemePayload::Exact(exact), Scheme::Exact) => {
            let auth = &exact.authorization;
            let authorization = Authorization::Exact(ExactAuthorization {
                from: parse_address(&auth.from).ok_or_else(invalid_payload)?,
                to: parse_address(&auth.to).ok_or_else(invalid_payload)?,
                value: parse_amount(&auth.value)?,
                valid_after: parse_amount(&auth.valid_after)?,
                valid_before: parse_amount(&auth.valid_before)?,
                nonce: parse_nonce(&auth.nonce)?,
                signature: parse_signature(&exact.signature)?,
            });
            let domain = Domain {
                name: requirements
                    .extra_str("name")
                    .unwrap_or_else(|| network.usdc_name())
                    .to_string(),
                version: requirements
                    .extra_str("version")
                    .unwrap_or_else(|| network.usdc_version())
                    .to_string(),
                chain_id: network.chain_id(),
                verifying_contract: asset,
            };
            (authorization, domain)
        }
        (SchemePayload::Deferred(deferred), Scheme::Deferred) => {
            let voucher = &deferred.voucher;
            let authorization = Authorization::Deferred(DeferredAuthorization {
                from: parse_address(&voucher.from).ok_or_else(invalid_payload)?,
                to: parse_address(&voucher.to).ok_or_else(invalid_payload)?,
                value: parse_amount(&voucher.value)?,
                expiry: parse_amount(&voucher.expiry)?,
                nonce: parse_nonce(&voucher.nonce)?,
                signature: parse_signature(&deferred.signature)?,
            });
            let escrow = registry
                .escrow_for(network)
                .ok_or_else(|| reject(ErrorReason::UnsupportedNetwork))?;
            (
                authorization,
                Domain::deferred_escrow(network.chain_id(), escrow),
            )
        }
        _ => return Err(invalid_payload()),
    };

    let payment = ValidatedPayment {
        network,
        scheme,
        asset,
        pay_to,
        max_amount,
        domain,
        authorization,
    };

    let value = payment.value();
    if value > max_amount || (value.is_zero() && !max_amount.is_zero()) {
        return Err(reject(ErrorReason::AmountMismatch));
    }

    let to = match &payment.authorization {
        Authorization::Exact(auth) => auth.to,
        Authorization::Deferred(voucher) => voucher.to,
    };
    if to != pay_to {
        return Err(reject(ErrorReason::RecipientMismatch));
    }

    Ok(payment)
}

/// Best-effort payer for responses to payloads that failed validation
pub fn claimed_payer(payload: &PaymentPayload) -> Option<Address> {
    parse_address(payload.claimed_payer())
}

fn reject(reason: ErrorReason) -> X402Error {
    X402Error::rejected(reason)
}

fn invalid_payload() -> X402Error {
    reject(ErrorReason::InvalidPayload)
}

/// Non-negative integer in decimal notation
fn parse_amount(value: &str) -> Result<U256> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_payload());
    }
    U256::from_dec_str(value).map_err(|_| invalid_payload())
}

/// 32-byte hex value
fn parse_nonce(value: &str) -> Result<H256> {
    let bytes = hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|_| invalid_payload())?;
    if bytes.len() != 32 {
        return Err(invalid_payload());
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_signature(value: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|_| invalid_payload())?;
    if bytes.is_empty() {
        return Err(invalid_payload());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn reason(result: Result<ValidatedPayment>) -> ErrorReason {
        result.unwrap_err().reason()
    }

    #[test]
    fn test_valid_exact_payment() {
        let request = exact_request(Network::Avalanche, "1000000", "1000000", NOW - 10, NOW + 60);
        let payment = validate_request(&registry(), &request).unwrap();

        assert_eq!(payment.scheme, Scheme::Exact);
        assert_eq!(payment.network, Network::Avalanche);
        assert_eq!(payment.payer(), payer());
        assert_eq!(payment.value(), U256::from(1_000_000u64));
        assert_eq!(payment.domain.name, "USD Coin");
        assert_eq!(payment.domain.chain_id, 43114);
    }

    #[test]
    fn test_valid_deferred_payment() {
        let request = deferred_request("250", "1000", NOW + 60);
        let payment = validate_request(&registry(), &request).unwrap();
        assert_eq!(payment.scheme, Scheme::Deferred);
        assert_eq!(payment.domain.verifying_contract, escrow());
    }

    #[test]
    fn test_version_checked_first() {
        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.payment_payload.x402_version = 2;
        request.payment_payload.network = "solana".to_string();
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::UnsupportedVersion
        );

        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.x402_version = 7;
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::UnsupportedVersion
        );
    }

    #[test]
    fn test_scheme_checks() {
        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.payment_payload.scheme = "upto".to_string();
        request.payment_requirements.scheme = "upto".to_string();
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::UnsupportedScheme
        );

        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.payment_requirements.scheme = "deferred".to_string();
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::UnsupportedScheme
        );
    }

    #[test]
    fn test_network_mismatch_short_circuits() {
        // The amount is also wrong, but the network check runs first
        let mut request = exact_request(Network::Avalanche, "5000000", "1000000", NOW, NOW + 60);
        request.payment_requirements.network = "base".to_string();
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::NetworkMismatch
        );
    }

    #[test]
    fn test_unregistered_network() {
        let request = exact_request(Network::AvalancheFuji, "1", "1", NOW, NOW + 60);
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::UnsupportedNetwork
        );

        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.payment_payload.network = "ethereum".to_string();
        request.payment_requirements.network = "ethereum".to_string();
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::UnsupportedNetwork
        );
    }

    #[test]
    fn test_unknown_asset() {
        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.payment_requirements.asset = format!("0x{}", "12".repeat(20));
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::UnsupportedAsset
        );

        // Case differences are not a mismatch
        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.payment_requirements.asset = Network::Avalanche.usdc_address().to_lowercase();
        assert!(validate_request(&registry(), &request).is_ok());
    }

    #[test]
    fn test_malformed_fields() {
        let cases: Vec<fn(&mut FacilitatorRequest)> = vec![
            |r: &mut FacilitatorRequest| exact_auth(r).from = "0x1234".to_string(),
            |r: &mut FacilitatorRequest| exact_auth(r).value = "-5".to_string(),
            |r: &mut FacilitatorRequest| exact_auth(r).value = "1.5".to_string(),
            |r: &mut FacilitatorRequest| exact_auth(r).value = String::new(),
            |r: &mut FacilitatorRequest| exact_auth(r).valid_before = "soon".to_string(),
            |r: &mut FacilitatorRequest| exact_auth(r).nonce = "0x1234".to_string(),
            |r: &mut FacilitatorRequest| exact_payload(r).signature = "0xnothex".to_string(),
            |r: &mut FacilitatorRequest| r.payment_requirements.max_amount_required = "lots".to_string(),
            |r: &mut FacilitatorRequest| r.payment_requirements.pay_to = "nobody".to_string(),
        ];

        for mutate in cases {
            let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
            mutate(&mut request);
            assert_eq!(
                reason(validate_request(&registry(), &request)),
                ErrorReason::InvalidPayload
            );
        }
    }

    #[test]
    fn test_payload_variant_must_match_scheme() {
        let mut request = deferred_request("250", "1000", NOW + 60);
        request.payment_payload.scheme = "exact".to_string();
        request.payment_requirements.scheme = "exact".to_string();
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::InvalidPayload
        );
    }

    #[test]
    fn test_amount_checks() {
        let request = exact_request(Network::Avalanche, "1000001", "1000000", NOW, NOW + 60);
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::AmountMismatch
        );

        let request = exact_request(Network::Avalanche, "999999", "1000000", NOW, NOW + 60);
        assert!(validate_request(&registry(), &request).is_ok());

        let request = exact_request(Network::Avalanche, "0", "1000000", NOW, NOW + 60);
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::AmountMismatch
        );

        // A zero maximum marks the resource as free
        let request = exact_request(Network::Avalanche, "0", "0", NOW, NOW + 60);
        assert!(validate_request(&registry(), &request).is_ok());
    }

    #[test]
    fn test_recipient_mismatch() {
        let mut request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        request.payment_requirements.pay_to = format!("0x{}", "77".repeat(20));
        assert_eq!(
            reason(validate_request(&registry(), &request)),
            ErrorReason::RecipientMismatch
        );
    }

    #[test]
    fn test_claimed_payer() {
        let request = exact_request(Network::Avalanche, "1", "1", NOW, NOW + 60);
        assert_eq!(claimed_payer(&request.payment_payload), Some(payer()));

        let mut request = request;
        exact_auth(&mut request).from = "garbage".to_string();
        assert_eq!(claimed_payer(&request.payment_payload), None);
    }
}
