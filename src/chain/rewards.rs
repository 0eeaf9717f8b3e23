//! Gauge emissions owed to a position

use alloy_primitives::{Address, U256};
use tracing::debug;

use super::abi::{IClGaugeFactory, IGaugeV2};
use super::caller::{call_typed, ContractCaller};
use crate::error::{Error, Result};
use crate::exchanges::ExchangeDescriptor;
use crate::ledger::PositionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRewards {
    pub gauge: Address,
    pub reward_token: Address,
    pub amount: U256,
}

pub struct RewardAggregator;

impl RewardAggregator {
    /// `getGauge(pool)` on the gauge factory, then `earned(rewardToken, id)`
    /// on the gauge. Only valid for exchanges that run gauges.
    pub async fn get_pending_rewards<C>(
        caller: &C,
        pool: Address,
        exchange: &ExchangeDescriptor,
        position_id: PositionId,
    ) -> Result<PendingRewards>
    where
        C: ContractCaller + ?Sized,
    {
        let (Some(gauge_factory), Some(reward_token)) = (exchange.gauge_factory, exchange.reward_token) else {
            return Err(Error::validation(format!("{} has no gauge factory", exchange.exchange)));
        };

        let gauge = call_typed(caller, gauge_factory, IClGaugeFactory::getGaugeCall { pool })
            .await
            .map_err(|e| e.into_transient("getGauge()"))?;
        if gauge == Address::ZERO {
            return Err(Error::transient(format!("no gauge for pool {}", pool)));
        }

        let amount = call_typed(
            caller,
            gauge,
            IGaugeV2::earnedCall {
                token: reward_token,
                tokenId: U256::from(position_id),
            },
        )
        .await
        .map_err(|e| e.into_transient("earned()"))?;

        debug!("Position {} on {} earned {} via gauge {}", position_id, exchange.exchange, amount, gauge);

        Ok(PendingRewards {
            gauge,
            reward_token,
            amount,
        })
    }
}
