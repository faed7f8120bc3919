//! Common constants for networks, schemes and protocol headers

/// Network identifiers as they appear on the wire
pub mod networks {
    /// Base mainnet
    pub const BASE_MAINNET: &str = "base";
    /// Base Sepolia testnet
    pub const BASE_SEPOLIA: &str = "base-sepolia";
    /// Avalanche C-Chain mainnet
    pub const AVALANCHE_MAINNET: &str = "avalanche";
    /// Avalanche Fuji testnet
    pub const AVALANCHE_FUJI: &str = "avalanche-fuji";

    /// Get USDC contract address for a network
    pub fn get_usdc_address(network: &str) -> Option<&'static str> {
        match network {
            BASE_MAINNET => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            BASE_SEPOLIA => Some("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
            AVALANCHE_MAINNET => Some("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
            AVALANCHE_FUJI => Some("0x5425890298aed601595a70AB815c96711a31Bc65"),
            _ => None,
        }
    }

    /// Check if a network identifier is known
    pub fn is_supported(network: &str) -> bool {
        matches!(
            network,
            BASE_MAINNET | BASE_SEPOLIA | AVALANCHE_MAINNET | AVALANCHE_FUJI
        )
    }
}

/// Payment schemes
pub mod schemes {
    /// Exact payment scheme (EIP-3009 transferWithAuthorization)
    pub const EXACT: &str = "exact";
    /// Deferred payment scheme (escrow-redeemed vouchers)
    pub const DEFERRED: &str = "deferred";
}

/// Response headers emitted by the facilitator
pub mod headers {
    /// Per-request correlation id
    pub const REQUEST_ID: &str = "x-request-id";
    /// Network the request resolved to
    pub const PAYMENT_NETWORK: &str = "x-payment-network";
    /// Scheme the request resolved to
    pub const PAYMENT_SCHEME: &str = "x-payment-scheme";
    /// Verification outcome (`true`/`false`)
    pub const PAYMENT_VALID: &str = "x-payment-valid";
    /// Settlement outcome (`true`/`false`)
    pub const PAYMENT_SUCCESS: &str = "x-payment-success";
    /// Payer address, when known
    pub const PAYMENT_PAYER: &str = "x-payment-payer";
    /// Settlement transaction hash, when known
    pub const PAYMENT_TRANSACTION: &str = "x-payment-transaction";
    /// Base64 JSON encoding of the settle result
    pub const PAYMENT_RESPONSE: &str = "x-payment-response";
    /// Distinct schemes offered, comma separated
    pub const SUPPORTED_SCHEMES: &str = "x-supported-schemes";
    /// Distinct networks offered, comma separated
    pub const SUPPORTED_NETWORKS: &str = "x-supported-networks";
}
