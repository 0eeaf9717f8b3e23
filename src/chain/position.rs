//! Position manager reads
//!
//! Resolves a position id to its ticks, tokens, liquidity and owner. A
//! lookup that fails because the NFT no longer exists is reported as
//! [`Error::Burned`]; every other failure is transient.

use alloy_primitives::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};

use super::abi::{INonfungiblePositionManager, ISlipstreamPositionManager};
use super::caller::{call_typed, CallError, ContractCaller};
use super::metadata::{TokenMetadata, TokenMetadataCache};
use crate::error::{Error, Result};
use crate::exchanges::ExchangeDescriptor;
use crate::ledger::PositionId;

/// Position state as read from the position manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainPosition {
    pub token0: Address,
    pub token1: Address,
    /// Zero on forks that address pools by tick spacing
    pub fee_tier: u32,
    pub tick_spacing: Option<i32>,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub owner: Address,
}

impl OnChainPosition {
    /// Liquidity as a decimal string, the ledger's storage format
    pub fn liquidity_string(&self) -> String {
        self.liquidity.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct PositionRead {
    pub position_id: PositionId,
    pub position: OnChainPosition,
    pub token0: TokenMetadata,
    pub token1: TokenMetadata,
}

pub struct PositionReader {
    metadata: Arc<TokenMetadataCache>,
}

impl PositionReader {
    pub fn new(metadata: Arc<TokenMetadataCache>) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &Arc<TokenMetadataCache> {
        &self.metadata
    }

    pub async fn get_position<C>(
        &self,
        caller: &C,
        position_id: PositionId,
        exchange: &ExchangeDescriptor,
    ) -> Result<PositionRead>
    where
        C: ContractCaller + ?Sized,
    {
        let token_id = U256::from(position_id);
        let classify = |context: &str, err: CallError| -> Error {
            if err.is_nonexistent_token() {
                debug!("Position {} on {} does not resolve: {}", position_id, exchange.exchange, err);
                Error::Burned {
                    position_id,
                    exchange: exchange.exchange,
                }
            } else {
                warn!("Error reading position {} on {}: {}", position_id, exchange.exchange, err);
                err.into_transient(context)
            }
        };

        let mut position = if exchange.uses_tick_spacing() {
            let p = call_typed(caller, exchange.nfpm, ISlipstreamPositionManager::positionsCall { tokenId: token_id })
                .await
                .map_err(|e| classify("positions()", e))?;
            OnChainPosition {
                token0: p.token0,
                token1: p.token1,
                fee_tier: 0,
                tick_spacing: Some(p.tickSpacing.as_i32()),
                tick_lower: p.tickLower.as_i32(),
                tick_upper: p.tickUpper.as_i32(),
                liquidity: p.liquidity,
                owner: Address::ZERO,
            }
        } else {
            let p = call_typed(caller, exchange.nfpm, INonfungiblePositionManager::positionsCall { tokenId: token_id })
                .await
                .map_err(|e| classify("positions()", e))?;
            OnChainPosition {
                token0: p.token0,
                token1: p.token1,
                fee_tier: p.fee.to::<u32>(),
                tick_spacing: None,
                tick_lower: p.tickLower.as_i32(),
                tick_upper: p.tickUpper.as_i32(),
                liquidity: p.liquidity,
                owner: Address::ZERO,
            }
        };

        position.owner = call_typed(caller, exchange.nfpm, INonfungiblePositionManager::ownerOfCall { tokenId: token_id })
            .await
            .map_err(|e| classify("ownerOf()", e))?;

        let token0 = self.metadata.resolve(caller, exchange.chain_id, position.token0).await?;
        let token1 = self.metadata.resolve(caller, exchange.chain_id, position.token1).await?;

        Ok(PositionRead {
            position_id,
            position,
            token0,
            token1,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::caller::mock::MockCaller;
    use crate::chain::metadata::tests::{with_token, USDC, WETH};
    use crate::exchanges::{Exchange, ExchangeRegistry};
    use alloy_primitives::aliases::{I24, U24, U96};
    use alloy_primitives::address;
    use alloy_sol_types::{Revert, SolError};

    pub const OWNER: Address = address!("1111111111111111111111111111111111111111");

    pub fn positions_return(
        token0: Address,
        token1: Address,
        fee: u32,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128,
    ) -> INonfungiblePositionManager::positionsReturn {
        INonfungiblePositionManager::positionsReturn {
            nonce: U96::ZERO,
            operator: Address::ZERO,
            token0,
            token1,
            fee: U24::from(fee),
            tickLower: I24::try_from(tick_lower).unwrap(),
            tickUpper: I24::try_from(tick_upper).unwrap(),
            liquidity,
            feeGrowthInside0LastX128: U256::ZERO,
            feeGrowthInside1LastX128: U256::ZERO,
            tokensOwed0: 0,
            tokensOwed1: 0,
        }
    }

    /// A caller serving a live WETH/USDC 0.05% position on the given exchange
    pub fn live_position_caller(descriptor: &ExchangeDescriptor, tick_lower: i32, tick_upper: i32) -> MockCaller {
        let caller = MockCaller::new()
            .on::<INonfungiblePositionManager::positionsCall>(
                descriptor.nfpm,
                &positions_return(WETH, USDC, 500, tick_lower, tick_upper, 1_000_000_000_000),
            )
            .on::<INonfungiblePositionManager::ownerOfCall>(descriptor.nfpm, &OWNER);
        with_token(with_token(caller, WETH, "WETH", 18), USDC, "USDC", 6)
    }

    /// Make every position id on `descriptor` revert as nonexistent
    pub fn with_burned_positions(caller: MockCaller, descriptor: &ExchangeDescriptor) -> MockCaller {
        burn_positions(&caller, descriptor);
        caller
    }

    pub fn burn_positions(caller: &MockCaller, descriptor: &ExchangeDescriptor) {
        let revert = Revert::from("Invalid token ID".to_string()).abi_encode();
        caller.set_failure::<INonfungiblePositionManager::positionsCall>(
            descriptor.nfpm,
            CallError::from_revert_data(revert.into()),
        );
    }

    #[tokio::test]
    async fn test_reads_position_and_metadata() {
        let registry = ExchangeRegistry::builtin();
        let nile = registry.get(Exchange::Nile).unwrap();
        let caller = live_position_caller(nile, -200, 200);
        let reader = PositionReader::new(Arc::new(TokenMetadataCache::new()));

        let read = reader.get_position(&caller, 71255, nile).await.unwrap();
        assert_eq!(read.position.fee_tier, 500);
        assert_eq!(read.position.tick_lower, -200);
        assert_eq!(read.position.tick_upper, 200);
        assert_eq!(read.position.owner, OWNER);
        assert_eq!(read.position.tick_spacing, None);
        assert_eq!(read.position.liquidity_string(), "1000000000000");
        assert_eq!(read.token0.symbol, "WETH");
        assert_eq!(read.token1.decimals, 6);

        // metadata is now cached: only positions + ownerOf the second time
        let before = caller.call_count();
        reader.get_position(&caller, 71255, nile).await.unwrap();
        assert_eq!(caller.call_count() - before, 2);
    }

    #[tokio::test]
    async fn test_reads_slipstream_layout() {
        let registry = ExchangeRegistry::builtin();
        let aero = registry.get(Exchange::Aerodrome).unwrap();
        let ret = ISlipstreamPositionManager::positionsReturn {
            nonce: U96::ZERO,
            operator: Address::ZERO,
            token0: WETH,
            token1: USDC,
            tickSpacing: I24::try_from(100).unwrap(),
            tickLower: I24::try_from(-1000).unwrap(),
            tickUpper: I24::try_from(1000).unwrap(),
            liquidity: 42,
            feeGrowthInside0LastX128: U256::ZERO,
            feeGrowthInside1LastX128: U256::ZERO,
            tokensOwed0: 0,
            tokensOwed1: 0,
        };
        let caller = MockCaller::new()
            .on::<ISlipstreamPositionManager::positionsCall>(aero.nfpm, &ret)
            .on::<INonfungiblePositionManager::ownerOfCall>(aero.nfpm, &OWNER);
        let caller = with_token(with_token(caller, WETH, "WETH", 18), USDC, "USDC", 6);

        let reader = PositionReader::new(Arc::new(TokenMetadataCache::new()));
        let read = reader.get_position(&caller, 9, aero).await.unwrap();
        assert_eq!(read.position.tick_spacing, Some(100));
        assert_eq!(read.position.fee_tier, 0);
    }

    #[tokio::test]
    async fn test_invalid_id_is_burned() {
        let registry = ExchangeRegistry::builtin();
        let nile = registry.get(Exchange::Nile).unwrap();
        let caller = with_burned_positions(MockCaller::new(), nile);
        let reader = PositionReader::new(Arc::new(TokenMetadataCache::new()));

        let err = reader.get_position(&caller, 71255, nile).await.unwrap_err();
        assert!(err.is_burned());
    }

    #[tokio::test]
    async fn test_rpc_failure_is_transient() {
        let registry = ExchangeRegistry::builtin();
        let nile = registry.get(Exchange::Nile).unwrap();
        let caller = MockCaller::new().fail::<INonfungiblePositionManager::positionsCall>(
            nile.nfpm,
            CallError::Transport("request timed out".into()),
        );
        let reader = PositionReader::new(Arc::new(TokenMetadataCache::new()));

        let err = reader.get_position(&caller, 71255, nile).await.unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }
}
