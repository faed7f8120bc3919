//! Network configuration types

use super::constants::networks;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chains this facilitator knows how to settle on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    #[serde(rename = "avalanche")]
    Avalanche,
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
}

impl Network {
    /// All known networks, in registry order
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::Avalanche,
            Network::AvalancheFuji,
        ]
    }

    /// Get the network identifier string
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Base => networks::BASE_MAINNET,
            Network::BaseSepolia => networks::BASE_SEPOLIA,
            Network::Avalanche => networks::AVALANCHE_MAINNET,
            Network::AvalancheFuji => networks::AVALANCHE_FUJI,
        }
    }

    /// Get network by identifier
    pub fn from_name(name: &str) -> Option<Self> {
        Self::variants().iter().copied().find(|n| n.as_str() == name)
    }

    /// EIP-155 chain id
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Avalanche => 43114,
            Network::AvalancheFuji => 43113,
        }
    }

    /// Get the USDC contract address for this network
    pub fn usdc_address(&self) -> &'static str {
        match self {
            Network::Base => "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            Network::BaseSepolia => "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            Network::Avalanche => "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
            Network::AvalancheFuji => "0x5425890298aed601595a70AB815c96711a31Bc65",
        }
    }

    /// EIP-712 domain name of the USDC contract
    pub fn usdc_name(&self) -> &'static str {
        match self {
            Network::BaseSepolia => "USDC",
            _ => "USD Coin",
        }
    }

    /// EIP-712 domain version of the USDC contract
    pub fn usdc_version(&self) -> &'static str {
        "2"
    }

    /// Whether this is a testnet
    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::BaseSepolia | Network::AvalancheFuji)
    }

    /// Suffix used for per-network environment variables (`base-sepolia` -> `BASE_SEPOLIA`)
    pub fn env_suffix(&self) -> String {
        self.as_str().to_uppercase().replace('-', "_")
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = crate::X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| crate::X402Error::NetworkNotSupported {
            network: s.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_names_round_trip() {
        for network in Network::variants() {
            assert_eq!(Network::from_name(network.as_str()), Some(*network));
            assert!(networks::is_supported(network.as_str()));
            assert_eq!(
                networks::get_usdc_address(network.as_str()),
                Some(network.usdc_address())
            );
        }
        assert!(Network::from_name("ethereum").is_none());
        assert!("solana".parse::<Network>().is_err());
    }

    #[test]
    fn test_network_serde() {
        let json = serde_json::to_string(&Network::AvalancheFuji).unwrap();
        assert_eq!(json, "\"avalanche-fuji\"");
        let parsed: Network = serde_json::from_str("\"base\"").unwrap();
        assert_eq!(parsed, Network::Base);
    }

    #[test]
    fn test_env_suffix() {
        assert_eq!(Network::BaseSepolia.env_suffix(), "BASE_SEPOLIA");
        assert_eq!(Network::Avalanche.env_suffix(), "AVALANCHE");
    }
}
