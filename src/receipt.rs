//! Receipts and protocol response headers
//!
//! Everything here is a pure function of its inputs. Verify and settle headers
//! always carry the request id, network and scheme, whether the call succeeded or
//! not, so a caller can correlate any response with its request.

use crate::registry::SchemeRegistry;
use crate::types::{
    headers, FacilitatorRequest, Receipt, SettleResponse, SupportedKinds, VerifyResponse,
};
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Assemble the client-facing receipt of a settle call
pub fn create_receipt(
    request_id: &str,
    request: &FacilitatorRequest,
    response: &SettleResponse,
    timestamp: DateTime<Utc>,
) -> Receipt {
    Receipt {
        request_id: request_id.to_string(),
        network: response.network.clone(),
        scheme: request.payment_payload.scheme.clone(),
        success: response.success,
        payer: response.payer.clone(),
        transaction: response.transaction.clone(),
        amount: request.payment_payload.claimed_amount().to_string(),
        asset: request.payment_requirements.asset.clone(),
        timestamp,
    }
}

/// Headers of a `POST /verify` response
pub fn verify_headers(
    request_id: &str,
    network: &str,
    scheme: &str,
    response: &VerifyResponse,
) -> HeaderMap {
    let mut map = correlation_headers(request_id, network, scheme);
    insert(&mut map, headers::PAYMENT_VALID, &response.is_valid.to_string());
    if let Some(payer) = &response.payer {
        insert(&mut map, headers::PAYMENT_PAYER, payer);
    }
    map
}

/// Headers of a `POST /settle` response
pub fn settle_headers(
    request_id: &str,
    network: &str,
    scheme: &str,
    response: &SettleResponse,
) -> HeaderMap {
    let mut map = correlation_headers(request_id, network, scheme);
    insert(&mut map, headers::PAYMENT_SUCCESS, &response.success.to_string());
    if let Some(payer) = &response.payer {
        insert(&mut map, headers::PAYMENT_PAYER, payer);
    }
    if let Some(transaction) = &response.transaction {
        insert(&mut map, headers::PAYMENT_TRANSACTION, transaction);
    }
    if let Ok(encoded) = response.to_base64() {
        insert(&mut map, headers::PAYMENT_RESPONSE, &encoded);
    }
    map
}

/// Body of `GET /supported`
pub fn supported_response(registry: &SchemeRegistry) -> SupportedKinds {
    SupportedKinds {
        kinds: registry.supported_kinds(),
    }
}

/// Headers of `GET /supported`: distinct schemes and networks in first-seen order
pub fn supported_headers(supported: &SupportedKinds) -> HeaderMap {
    let mut schemes: Vec<&str> = Vec::new();
    let mut networks: Vec<&str> = Vec::new();
    for kind in &supported.kinds {
        push_distinct(&mut schemes, kind.scheme.as_str());
        push_distinct(&mut networks, kind.network.as_str());
    }

    let mut map = HeaderMap::new();
    insert(&mut map, headers::SUPPORTED_SCHEMES, &schemes.join(","));
    insert(&mut map, headers::SUPPORTED_NETWORKS, &networks.join(","));
    map
}

fn correlation_headers(request_id: &str, network: &str, scheme: &str) -> HeaderMap {
    let mut map = HeaderMap::new();
    insert(&mut map, headers::REQUEST_ID, request_id);
    insert(&mut map, headers::PAYMENT_NETWORK, network);
    insert(&mut map, headers::PAYMENT_SCHEME, scheme);
    map
}

fn push_distinct<'a>(values: &mut Vec<&'a str>, value: &'a str) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Values come from client input; anything not representable becomes "invalid"
fn insert(map: &mut HeaderMap, name: &'static str, value: &str) {
    let value = HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    map.insert(HeaderName::from_static(name), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorReason, Network};
    use ethereum_types::Address;

    fn header<'a>(map: &'a HeaderMap, name: &str) -> Option<&'a str> {
        map.get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_verify_headers_on_failure() {
        let response = VerifyResponse::invalid(None, ErrorReason::Expired);
        let map = verify_headers("req-1", "avalanche", "exact", &response);

        assert_eq!(header(&map, "x-request-id"), Some("req-1"));
        assert_eq!(header(&map, "x-payment-network"), Some("avalanche"));
        assert_eq!(header(&map, "x-payment-scheme"), Some("exact"));
        assert_eq!(header(&map, "x-payment-valid"), Some("false"));
        assert_eq!(header(&map, "x-payment-payer"), None);
    }

    #[test]
    fn test_settle_headers_on_success() {
        let response = SettleResponse {
            success: true,
            payer: Some("0x857b06519E91e3A54538791bDbb0E22373e36b66".to_string()),
            transaction: Some(format!("0x{}", "ab".repeat(32))),
            network: "base".to_string(),
            error_reason: None,
        };
        let map = settle_headers("req-2", "base", "exact", &response);

        assert_eq!(header(&map, "x-payment-success"), Some("true"));
        assert_eq!(
            header(&map, "x-payment-payer"),
            Some("0x857b06519E91e3A54538791bDbb0E22373e36b66")
        );
        assert_eq!(
            header(&map, "x-payment-transaction"),
            response.transaction.as_deref()
        );
        assert_eq!(
            header(&map, "x-payment-response").map(str::to_string),
            Some(response.to_base64().unwrap())
        );
    }

    #[test]
    fn test_unrepresentable_header_value() {
        let response = VerifyResponse::invalid(None, ErrorReason::UnsupportedNetwork);
        let map = verify_headers("req\n3", "base", "exact", &response);
        assert_eq!(header(&map, "x-request-id"), Some("invalid"));
    }

    #[test]
    fn test_create_receipt() {
        let request = crate::test_support::exact_request(
            Network::Avalanche,
            "1000000",
            "1000000",
            crate::test_support::NOW - 10,
            crate::test_support::NOW + 60,
        );
        let response = SettleResponse::failed("avalanche", None, ErrorReason::Timeout);
        let timestamp = DateTime::from_timestamp(crate::test_support::NOW, 0).unwrap();

        let receipt = create_receipt("req-4", &request, &response, timestamp);
        assert_eq!(receipt.request_id, "req-4");
        assert_eq!(receipt.network, "avalanche");
        assert_eq!(receipt.scheme, "exact");
        assert!(!receipt.success);
        assert_eq!(receipt.amount, "1000000");
        assert_eq!(receipt.asset, request.payment_requirements.asset);
        assert_eq!(receipt, create_receipt("req-4", &request, &response, timestamp));
    }

    #[test]
    fn test_supported_headers_first_seen_order() {
        let registry = SchemeRegistry::new()
            .with_exact(Network::BaseSepolia)
            .with_exact(Network::Avalanche)
            .with_deferred(Network::BaseSepolia, Address::repeat_byte(0x33));
        let supported = supported_response(&registry);
        assert_eq!(supported.kinds.len(), 3);

        let map = supported_headers(&supported);
        assert_eq!(header(&map, "x-supported-schemes"), Some("exact,deferred"));
        assert_eq!(
            header(&map, "x-supported-networks"),
            Some("base-sepolia,avalanche")
        );
    }
}
