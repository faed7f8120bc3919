//! Table of the (scheme, network, asset) triples this facilitator offers
//!
//! The registry is built once at startup and shared read-only. Nothing in the
//! crate mutates it after construction.

use crate::crypto::signature::{parse_address, to_checksum_address};
use crate::types::{Network, Scheme, SupportedKind, X402_VERSION};
use ethereum_types::Address;
use serde_json::json;

/// One offered (scheme, network) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeEntry {
    pub scheme: Scheme,
    pub network: Network,
    /// Token contract settled on this network
    pub asset: Address,
    /// Escrow contract redeeming vouchers (deferred entries only)
    pub escrow: Option<Address>,
}

/// Immutable registry of supported kinds
#[derive(Debug, Clone, Default)]
pub struct SchemeRegistry {
    entries: Vec<SchemeEntry>,
}

impl SchemeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer the exact scheme on `network`, settling its USDC contract
    pub fn with_exact(self, network: Network) -> Self {
        self.with_entry(Scheme::Exact, network, None)
    }

    /// Offer the deferred scheme on `network`, redeeming through `escrow`
    pub fn with_deferred(self, network: Network, escrow: Address) -> Self {
        self.with_entry(Scheme::Deferred, network, Some(escrow))
    }

    fn with_entry(mut self, scheme: Scheme, network: Network, escrow: Option<Address>) -> Self {
        if self.supports(scheme, network) {
            return self;
        }
        let asset = parse_address(network.usdc_address()).unwrap_or_default();
        self.entries.push(SchemeEntry {
            scheme,
            network,
            asset,
            escrow,
        });
        self
    }

    /// Every offered pair, in registration order
    pub fn entries(&self) -> &[SchemeEntry] {
        &self.entries
    }

    /// Supported kinds as advertised by `GET /supported`
    pub fn supported_kinds(&self) -> Vec<SupportedKind> {
        self.entries
            .iter()
            .map(|entry| SupportedKind {
                x402_version: X402_VERSION,
                scheme: entry.scheme,
                network: entry.network,
                asset: to_checksum_address(&entry.asset),
                extra: entry
                    .escrow
                    .map(|escrow| json!({ "escrow": to_checksum_address(&escrow) })),
            })
            .collect()
    }

    /// Asset settled on `network`, if any scheme is offered there
    pub fn asset_for(&self, network: Network) -> Option<Address> {
        self.entries
            .iter()
            .find(|entry| entry.network == network)
            .map(|entry| entry.asset)
    }

    /// Escrow contract of the deferred scheme on `network`
    pub fn escrow_for(&self, network: Network) -> Option<Address> {
        self.entry(Scheme::Deferred, network)
            .and_then(|entry| entry.escrow)
    }

    pub fn entry(&self, scheme: Scheme, network: Network) -> Option<&SchemeEntry> {
        self.entries
            .iter()
            .find(|entry| entry.scheme == scheme && entry.network == network)
    }

    /// Whether the (scheme, network) pair is offered
    pub fn supports(&self, scheme: Scheme, network: Network) -> bool {
        self.entry(scheme, network).is_some()
    }

    /// Whether `scheme` is offered on any network
    pub fn knows_scheme(&self, scheme: Scheme) -> bool {
        self.entries.iter().any(|entry| entry.scheme == scheme)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry() -> SchemeRegistry {
        SchemeRegistry::new()
            .with_exact(Network::Base)
            .with_exact(Network::Avalanche)
            .with_exact(Network::Base)
            .with_deferred(Network::Base, Address::repeat_byte(0x33))
            .with_deferred(Network::Base, Address::repeat_byte(0x44))
    }

    #[test]
    fn test_supported_kinds_deduplicated() {
        let kinds = registry().supported_kinds();
        assert_eq!(kinds.len(), 3);

        let pairs: HashSet<_> = kinds.iter().map(|k| (k.scheme, k.network)).collect();
        assert_eq!(pairs.len(), kinds.len());

        for kind in &kinds {
            assert!(kind.asset.eq_ignore_ascii_case(kind.network.usdc_address()));
        }
    }

    #[test]
    fn test_registration_order_preserved() {
        let kinds = registry().supported_kinds();
        assert_eq!(
            kinds
                .iter()
                .map(|k| (k.scheme, k.network))
                .collect::<Vec<_>>(),
            vec![
                (Scheme::Exact, Network::Base),
                (Scheme::Exact, Network::Avalanche),
                (Scheme::Deferred, Network::Base),
            ]
        );
    }

    #[test]
    fn test_first_escrow_wins() {
        let registry = registry();
        assert_eq!(
            registry.escrow_for(Network::Base),
            Some(Address::repeat_byte(0x33))
        );
        assert_eq!(registry.escrow_for(Network::Avalanche), None);

        let deferred = &registry.supported_kinds()[2];
        assert_eq!(
            deferred.extra.as_ref().unwrap()["escrow"],
            to_checksum_address(&Address::repeat_byte(0x33))
        );
    }

    #[test]
    fn test_lookups() {
        let registry = registry();
        assert!(registry.supports(Scheme::Exact, Network::Avalanche));
        assert!(!registry.supports(Scheme::Deferred, Network::Avalanche));
        assert!(!registry.supports(Scheme::Exact, Network::BaseSepolia));
        assert!(registry.knows_scheme(Scheme::Deferred));
        assert_eq!(
            registry.asset_for(Network::Avalanche),
            parse_address(Network::Avalanche.usdc_address())
        );
        assert_eq!(registry.asset_for(Network::AvalancheFuji), None);
        assert!(SchemeRegistry::new().is_empty());
    }
}
