//! Deterministic pool addresses
//!
//! Both factory families deploy pools with CREATE2, so the pool for a
//! position can be computed instead of looked up:
//!
//! - salted-hash forks: `salt = keccak256(abi.encode(token0, token1, fee))`
//!   with a per-exchange init code hash
//! - clone-proxy forks (Slipstream): `salt = keccak256(abi.encode(token0,
//!   token1, tickSpacing))` and the init code is an EIP-1167 minimal proxy
//!   pointing at the factory's `poolImplementation()`

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use tracing::debug;

use super::abi::IClFactory;
use super::caller::{call_typed, ContractCaller};
use crate::error::{Error, Result};
use crate::exchanges::{ExchangeDescriptor, PoolDerivation};

/// EIP-1167 creation code up to the implementation address
const CLONE_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];

/// EIP-1167 creation code after the implementation address
const CLONE_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Order two tokens the way the factory does
pub fn sort_tokens(a: Address, b: Address) -> (Address, Address) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// abi-encode a signed 24-bit value into its sign-extended 32 byte word
fn int24_word(value: i32) -> B256 {
    let mut word = if value < 0 { [0xff; 32] } else { [0u8; 32] };
    word[28..].copy_from_slice(&value.to_be_bytes());
    B256::from(word)
}

/// Pool address for a fee-tier addressed factory
pub fn salted_pool_address(
    factory: Address,
    init_code_hash: B256,
    token_a: Address,
    token_b: Address,
    fee: u32,
) -> Address {
    let (token0, token1) = sort_tokens(token_a, token_b);
    let salt = keccak256((token0, token1, U256::from(fee)).abi_encode());
    factory.create2(salt, init_code_hash)
}

/// Creation code of a minimal proxy delegating to `implementation`
pub fn clone_init_code(implementation: Address) -> Vec<u8> {
    let mut code = Vec::with_capacity(CLONE_PREFIX.len() + 20 + CLONE_SUFFIX.len());
    code.extend_from_slice(&CLONE_PREFIX);
    code.extend_from_slice(implementation.as_slice());
    code.extend_from_slice(&CLONE_SUFFIX);
    code
}

/// Pool address for a clone-proxy factory, given its pool implementation
pub fn clone_pool_address(
    factory: Address,
    implementation: Address,
    token_a: Address,
    token_b: Address,
    tick_spacing: i32,
) -> Address {
    let (token0, token1) = sort_tokens(token_a, token_b);
    let salt = keccak256((token0, token1, int24_word(tick_spacing)).abi_encode());
    let init_code_hash = keccak256(clone_init_code(implementation));
    factory.create2(salt, init_code_hash)
}

/// EIP-55 rendering used whenever a pool address is shown or stored
pub fn checksummed(address: &Address) -> String {
    address.to_checksum(None)
}

pub struct PoolAddressResolver;

impl PoolAddressResolver {
    /// Address of the pool a position lives in.
    ///
    /// `tick_spacing` is required for clone-proxy exchanges; those also cost
    /// one `poolImplementation()` read.
    pub async fn resolve<C>(
        caller: &C,
        exchange: &ExchangeDescriptor,
        token0: Address,
        token1: Address,
        fee: u32,
        tick_spacing: Option<i32>,
    ) -> Result<Address>
    where
        C: ContractCaller + ?Sized,
    {
        let pool = match exchange.derivation {
            PoolDerivation::SaltedHash { init_code_hash } => {
                salted_pool_address(exchange.factory, init_code_hash, token0, token1, fee)
            }
            PoolDerivation::CloneProxy => {
                let tick_spacing = tick_spacing.ok_or_else(|| {
                    Error::validation(format!("tick spacing is required for {} pools", exchange.exchange))
                })?;
                let implementation = call_typed(caller, exchange.factory, IClFactory::poolImplementationCall {})
                    .await
                    .map_err(|e| e.into_transient("poolImplementation()"))?;
                clone_pool_address(exchange.factory, implementation, token0, token1, tick_spacing)
            }
        };

        debug!("Resolved {} pool {}", exchange.exchange, checksummed(&pool));
        Ok(pool)
    }
}
