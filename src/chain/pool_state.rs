//! Pool price/liquidity reads
//!
//! Two eth_calls per query (slot0, liquidity). Nothing is cached: the
//! snapshot is only valid for the request that read it.

use alloy_primitives::{Address, U256};
use tracing::debug;

use super::abi::{IClPool, ISlipstreamPool};
use super::caller::{call_typed, ContractCaller};
use crate::error::Result;
use crate::exchanges::ExchangeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub pool: Address,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
}

pub struct PoolStateReader;

impl PoolStateReader {
    pub async fn get_pool_state<C>(caller: &C, pool: Address, exchange: &ExchangeDescriptor) -> Result<PoolSnapshot>
    where
        C: ContractCaller + ?Sized,
    {
        let (sqrt_price_x96, tick) = if exchange.uses_tick_spacing() {
            let slot0 = call_typed(caller, pool, ISlipstreamPool::slot0Call {})
                .await
                .map_err(|e| e.into_transient("slot0()"))?;
            (U256::from(slot0.sqrtPriceX96), slot0.tick.as_i32())
        } else {
            let slot0 = call_typed(caller, pool, IClPool::slot0Call {})
                .await
                .map_err(|e| e.into_transient("slot0()"))?;
            (U256::from(slot0.sqrtPriceX96), slot0.tick.as_i32())
        };

        let liquidity = call_typed(caller, pool, IClPool::liquidityCall {})
            .await
            .map_err(|e| e.into_transient("liquidity()"))?;

        debug!("Pool {} on {}: tick {} liquidity {}", pool, exchange.exchange, tick, liquidity);

        Ok(PoolSnapshot {
            pool,
            sqrt_price_x96,
            tick,
            liquidity,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::caller::mock::MockCaller;
    use crate::error::Error;
    use crate::exchanges::{Exchange, ExchangeRegistry};
    use alloy_primitives::aliases::{I24, U160};

    pub fn slot0_return(sqrt_price_x96: U256, tick: i32) -> IClPool::slot0Return {
        IClPool::slot0Return {
            sqrtPriceX96: U160::from(sqrt_price_x96),
            tick: I24::try_from(tick).unwrap(),
            observationIndex: 0,
            observationCardinality: 1,
            observationCardinalityNext: 1,
            feeProtocol: 0,
            unlocked: true,
        }
    }

    /// Register slot0 + liquidity answers for `pool`
    pub fn with_pool(caller: MockCaller, pool: Address, sqrt_price_x96: U256, tick: i32) -> MockCaller {
        caller
            .on::<IClPool::slot0Call>(pool, &slot0_return(sqrt_price_x96, tick))
            .on::<IClPool::liquidityCall>(pool, &5_000_000u128)
    }

    /// Move the pool to a new price after construction
    pub fn set_pool_tick(caller: &MockCaller, pool: Address, sqrt_price_x96: U256, tick: i32) {
        caller.set::<IClPool::slot0Call>(pool, &slot0_return(sqrt_price_x96, tick));
    }

    #[tokio::test]
    async fn test_reads_slot0_and_liquidity() {
        let registry = ExchangeRegistry::builtin();
        let nile = registry.get(Exchange::Nile).unwrap();
        let pool = Address::repeat_byte(0xab);
        let sqrt_price = U256::from(1u8) << 96;
        let caller = with_pool(MockCaller::new(), pool, sqrt_price, -5);

        let snapshot = PoolStateReader::get_pool_state(&caller, pool, nile).await.unwrap();
        assert_eq!(snapshot.tick, -5);
        assert_eq!(snapshot.sqrt_price_x96, sqrt_price);
        assert_eq!(snapshot.liquidity, 5_000_000);
        assert_eq!(snapshot.pool, pool);
    }

    #[tokio::test]
    async fn test_reads_slipstream_slot0() {
        let registry = ExchangeRegistry::builtin();
        let aero = registry.get(Exchange::Aerodrome).unwrap();
        let pool = Address::repeat_byte(0xcd);
        let ret = ISlipstreamPool::slot0Return {
            sqrtPriceX96: U160::from(1u64 << 40),
            tick: I24::try_from(12).unwrap(),
            observationIndex: 0,
            observationCardinality: 1,
            observationCardinalityNext: 1,
            unlocked: true,
        };
        let caller = MockCaller::new()
            .on::<ISlipstreamPool::slot0Call>(pool, &ret)
            .on::<IClPool::liquidityCall>(pool, &7u128);

        let snapshot = PoolStateReader::get_pool_state(&caller, pool, aero).await.unwrap();
        assert_eq!(snapshot.tick, 12);
        assert_eq!(snapshot.liquidity, 7);
    }

    #[tokio::test]
    async fn test_missing_pool_is_transient() {
        let registry = ExchangeRegistry::builtin();
        let nile = registry.get(Exchange::Nile).unwrap();
        let caller = MockCaller::new();

        let err = PoolStateReader::get_pool_state(&caller, Address::repeat_byte(1), nile)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }
}
