//! Supported exchange deployments
//!
//! Every exchange is a Uniswap V3 style fork with its own position manager
//! (NFPM), factory and, for the Ramses family, a gauge factory paying out
//! emissions per position.
//!
//! Pools are never looked up in a registry; their address is derived from
//! the factory with CREATE2 (see `chain::pool_address`).

use alloy_primitives::{address, b256, Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// ============================================
// CONSTANTS
// ============================================

/// Init code hash shared by all the Ramses V2-style forks
pub const RAMSES_POOL_INIT_CODE_HASH: B256 =
    b256!("1565b129f2d1790f12d45301b9b084335626f0c92410bc43130763b69971135d");

/// Position manager shared by the Ramses family forks (except Ramses itself)
const RAMSES_FAMILY_NFPM: Address = address!("AAA78E8C4241990B4ce159E105dA08129345946A");

/// Pool factory shared by the Ramses family forks (except Ramses itself)
const RAMSES_FAMILY_FACTORY: Address = address!("AAA32926fcE6bE95ea2c51cB4Fcb60836D320C42");

/// Gauge factory shared by Nile, Nuri and Pharaoh
const RAMSES_FAMILY_GAUGE_FACTORY: Address = address!("AAA2D4987EEd427Ba5E2c933EeFCD75C84b446B7");

// ============================================
// TYPES
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Nile,
    Pharaoh,
    Nuri,
    Ra,
    Cleo,
    Ramses,
    Aerodrome,
}

impl Exchange {
    pub const ALL: [Exchange; 7] = [
        Exchange::Nile,
        Exchange::Pharaoh,
        Exchange::Nuri,
        Exchange::Ra,
        Exchange::Cleo,
        Exchange::Ramses,
        Exchange::Aerodrome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nile => "nile",
            Exchange::Pharaoh => "pharaoh",
            Exchange::Nuri => "nuri",
            Exchange::Ra => "ra",
            Exchange::Cleo => "cleo",
            Exchange::Ramses => "ramses",
            Exchange::Aerodrome => "aerodrome",
        }
    }

    /// Environment variable overriding the RPC endpoint of the exchange's chain
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Exchange::Nile => "LINEA_RPC",
            Exchange::Pharaoh => "AVALANCHE_RPC",
            Exchange::Nuri => "SCROLL_RPC",
            Exchange::Ra => "FRAX_RPC",
            Exchange::Cleo => "MANTLE_RPC",
            Exchange::Ramses => "ARBITRUM_RPC",
            Exchange::Aerodrome => "BASE_RPC",
        }
    }

    /// Environment variable holding the exchange's token price listing URL
    pub fn price_env_var(&self) -> String {
        format!("{}_PRICE_API", self.as_str().to_uppercase())
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str() == name)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown exchange '{}' (supported: {})",
                    s,
                    Exchange::ALL.map(|e| e.as_str()).join(", ")
                ))
            })
    }
}

/// How an exchange's factory deploys pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolDerivation {
    /// CREATE2 with salt `keccak256(abi.encode(token0, token1, fee))`
    SaltedHash { init_code_hash: B256 },

    /// EIP-1167 clones of `poolImplementation()`, salted by tick spacing
    CloneProxy,
}

/// Static per-exchange deployment data
#[derive(Debug, Clone)]
pub struct ExchangeDescriptor {
    pub exchange: Exchange,
    pub rpc_url: String,
    pub chain_id: u64,
    pub nfpm: Address,
    pub factory: Address,
    pub derivation: PoolDerivation,
    pub gauge_factory: Option<Address>,
    pub reward_token: Option<Address>,
    pub price_api: Option<String>,
}

impl ExchangeDescriptor {
    /// Built-in deployment data for an exchange
    pub fn builtin(exchange: Exchange) -> Self {
        let salted = PoolDerivation::SaltedHash {
            init_code_hash: RAMSES_POOL_INIT_CODE_HASH,
        };

        let (rpc_url, chain_id, nfpm, factory, derivation, gauge_factory, reward_token) =
            match exchange {
                Exchange::Nile => (
                    "https://rpc.linea.build",
                    59144,
                    RAMSES_FAMILY_NFPM,
                    RAMSES_FAMILY_FACTORY,
                    salted,
                    Some(RAMSES_FAMILY_GAUGE_FACTORY),
                    Some(address!("AAAac83751090C6ea42379626435f805DDF54DC8")),
                ),
                Exchange::Pharaoh => (
                    "https://avalanche.drpc.org",
                    43114,
                    RAMSES_FAMILY_NFPM,
                    RAMSES_FAMILY_FACTORY,
                    salted,
                    Some(RAMSES_FAMILY_GAUGE_FACTORY),
                    Some(address!("AAAB9D12A30504559b0C5a9A5977fEE4A6081c6b")),
                ),
                Exchange::Nuri => (
                    "https://scroll.drpc.org",
                    534352,
                    RAMSES_FAMILY_NFPM,
                    RAMSES_FAMILY_FACTORY,
                    salted,
                    Some(RAMSES_FAMILY_GAUGE_FACTORY),
                    Some(address!("aaae8378809bb8815c08d3c59eb0c7d1529ad769")),
                ),
                Exchange::Ra => (
                    "https://rpc.frax.com",
                    252,
                    RAMSES_FAMILY_NFPM,
                    RAMSES_FAMILY_FACTORY,
                    salted,
                    None,
                    None,
                ),
                Exchange::Cleo => (
                    "https://mantle.drpc.org",
                    5000,
                    RAMSES_FAMILY_NFPM,
                    RAMSES_FAMILY_FACTORY,
                    salted,
                    Some(address!("AAA11500dDdB2B67a90d1a154dfB7eaBB518EAE6")),
                    Some(address!("c1e0c8c30f251a07a894609616580ad2ceb547f2")),
                ),
                Exchange::Ramses => (
                    "https://arbitrum.drpc.org",
                    42161,
                    address!("AA277CB7914b7e5514946Da92cb9De332Ce610EF"),
                    address!("AA2cd7477c451E703f3B9Ba5663334914763edF8"),
                    salted,
                    Some(address!("AA2fBD0C9393964aF7c66C1513e44A8CAAae4FDA")),
                    Some(address!("aaa6c1e32c55a7bfa8066a6fae9b42650f262418")),
                ),
                Exchange::Aerodrome => (
                    "https://base.llamarpc.com",
                    8453,
                    address!("827922686190790b37229fd06084350e74485b72"),
                    address!("5e7BB104d84c7CB9B682AaC2F3d509f5F406809A"),
                    PoolDerivation::CloneProxy,
                    None,
                    None,
                ),
            };

        Self {
            exchange,
            rpc_url: rpc_url.to_string(),
            chain_id,
            nfpm,
            factory,
            derivation,
            gauge_factory,
            reward_token,
            price_api: None,
        }
    }

    /// Pools are addressed by tick spacing instead of fee tier
    pub fn uses_tick_spacing(&self) -> bool {
        matches!(self.derivation, PoolDerivation::CloneProxy)
    }

    pub fn has_gauges(&self) -> bool {
        self.gauge_factory.is_some() && self.reward_token.is_some()
    }
}

/// Immutable set of descriptors, built once at startup
#[derive(Debug, Clone)]
pub struct ExchangeRegistry {
    descriptors: BTreeMap<Exchange, ExchangeDescriptor>,
}

impl ExchangeRegistry {
    pub fn builtin() -> Self {
        Self::from_descriptors(Exchange::ALL.map(ExchangeDescriptor::builtin))
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ExchangeDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().map(|d| (d.exchange, d)).collect(),
        }
    }

    pub fn get(&self, exchange: Exchange) -> Result<&ExchangeDescriptor, Error> {
        self.descriptors
            .get(&exchange)
            .ok_or_else(|| Error::validation(format!("exchange {} is not configured", exchange)))
    }

    /// Look up by the caller-supplied exchange name
    pub fn resolve(&self, name: &str) -> Result<&ExchangeDescriptor, Error> {
        self.get(name.parse()?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExchangeDescriptor> {
        self.descriptors.values()
    }
}
