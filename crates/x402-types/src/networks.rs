//! Known EVM networks.
//!
//! Payment terms name their network either by a well-known name (`"base-sepolia"`) or as a
//! CAIP-2 identifier (`"eip155:84532"`). The EIP-712 domain needs the numeric chain id, so
//! both forms resolve through [`chain_id_by_network`].
//!
//! ```
//! use x402_types::networks::{chain_id_by_network, network_name_by_chain_id};
//!
//! assert_eq!(chain_id_by_network("base-sepolia"), Some(84532));
//! assert_eq!(chain_id_by_network("eip155:31337"), Some(31337));
//! assert_eq!(network_name_by_chain_id(8453), Some("base"));
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

/// CAIP-2 namespace for EVM chains.
pub const EIP155_NAMESPACE: &str = "eip155";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub chain_id: u64,
}

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "ethereum",
        chain_id: 1,
    },
    NetworkInfo {
        name: "sepolia",
        chain_id: 11155111,
    },
    NetworkInfo {
        name: "base",
        chain_id: 8453,
    },
    NetworkInfo {
        name: "base-sepolia",
        chain_id: 84532,
    },
    NetworkInfo {
        name: "polygon",
        chain_id: 137,
    },
    NetworkInfo {
        name: "polygon-amoy",
        chain_id: 80002,
    },
    NetworkInfo {
        name: "avalanche",
        chain_id: 43114,
    },
    NetworkInfo {
        name: "avalanche-fuji",
        chain_id: 43113,
    },
    NetworkInfo {
        name: "arbitrum",
        chain_id: 42161,
    },
    NetworkInfo {
        name: "arbitrum-sepolia",
        chain_id: 421614,
    },
    NetworkInfo {
        name: "anvil",
        chain_id: 31337,
    },
];

static NAME_TO_CHAIN_ID: LazyLock<HashMap<&'static str, u64>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.name, n.chain_id)).collect());

static CHAIN_ID_TO_NAME: LazyLock<HashMap<u64, &'static str>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.chain_id, n.name)).collect());

/// Resolves a network name or `eip155:<id>` identifier to a numeric chain id.
pub fn chain_id_by_network(network: &str) -> Option<u64> {
    if let Some(reference) = network
        .strip_prefix(EIP155_NAMESPACE)
        .and_then(|rest| rest.strip_prefix(':'))
    {
        return reference.parse().ok();
    }
    NAME_TO_CHAIN_ID.get(network).copied()
}

pub fn network_name_by_chain_id(chain_id: u64) -> Option<&'static str> {
    CHAIN_ID_TO_NAME.get(&chain_id).copied()
}
