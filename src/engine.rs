//! The tracking engine
//!
//! Wires the chain readers, the range calculator, the price client and the
//! ledger into the four caller-facing operations (track, untrack,
//! untrack-all, list) plus the periodic range sweep.
//!
//! Each position goes through a strictly sequential pipeline:
//! position -> pool address -> pool state -> amounts -> rewards.
//! Positions of one listing (and chain positions of one sweep) run
//! concurrently and are joined; a failure in one entry never fails the
//! others.

use alloy_primitives::{Address, U256};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::{
    ContractCaller, PendingRewards, PoolAddressResolver, PoolSnapshot, PoolStateReader, PositionRead,
    PositionReader, RewardAggregator, RpcCaller, TokenMetadataCache,
};
use crate::error::{Error, Result};
use crate::exchanges::{Exchange, ExchangeDescriptor, ExchangeRegistry};
use crate::ledger::{PositionId, PositionStore, Reconciler, RowKey, TrackedPosition};
use crate::pricing::{PriceClient, PriceListing};
use crate::range::{self, format_amount, to_f64, TokenAmounts};

// ============================================
// REPORT TYPES
// ============================================

/// Live state of a tracked position, as shown in a listing
#[derive(Debug, Clone)]
pub struct PositionStatus {
    pub pool: Address,
    pub current_tick: i32,
    pub in_range: bool,
    pub liquidity: u128,
    pub amounts: TokenAmounts,
    pub rewards: Option<RewardStatus>,
    /// Both legs priced, otherwise unknown
    pub value_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RewardStatus {
    pub pending: PendingRewards,
    pub symbol: String,
    pub display: String,
    pub value_usd: Option<f64>,
}

/// One listing entry. `status` carries this position's own failure.
#[derive(Debug)]
pub struct PositionReport {
    pub row: TrackedPosition,
    pub status: Result<PositionStatus>,
}

/// A tracker's position crossed a range boundary since the last check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeAlert {
    pub tracker_id: String,
    pub display_name: String,
    pub position_id: PositionId,
    pub exchange: Exchange,
    pub pair: String,
    pub in_range: bool,
    pub current_tick: i32,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub checked: usize,
    pub burned: Vec<(PositionId, Exchange)>,
    pub alerts: Vec<RangeAlert>,
    pub failures: Vec<(PositionId, Exchange, Error)>,
}

/// Chain reads shared by listing and sweeping
struct Observation {
    read: PositionRead,
    snapshot: PoolSnapshot,
    in_range: bool,
}

// ============================================
// ENGINE
// ============================================

pub struct Sentinel {
    registry: ExchangeRegistry,
    callers: HashMap<Exchange, Arc<dyn ContractCaller>>,
    reader: PositionReader,
    reconciler: Reconciler,
    prices: Option<PriceClient>,
}

impl Sentinel {
    pub fn new(
        registry: ExchangeRegistry,
        callers: HashMap<Exchange, Arc<dyn ContractCaller>>,
        metadata: Arc<TokenMetadataCache>,
        store: Arc<dyn PositionStore>,
        prices: Option<PriceClient>,
    ) -> Self {
        Self {
            registry,
            callers,
            reader: PositionReader::new(metadata),
            reconciler: Reconciler::new(store),
            prices,
        }
    }

    /// One JSON-RPC caller per configured exchange
    pub fn connect(
        registry: ExchangeRegistry,
        metadata: Arc<TokenMetadataCache>,
        store: Arc<dyn PositionStore>,
        prices: Option<PriceClient>,
    ) -> Self {
        let callers = registry
            .iter()
            .map(|descriptor| {
                let caller: Arc<dyn ContractCaller> = Arc::new(RpcCaller::new(descriptor.rpc_url.clone()));
                (descriptor.exchange, caller)
            })
            .collect();

        Self::new(registry, callers, metadata, store, prices)
    }

    pub fn registry(&self) -> &ExchangeRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn caller(&self, exchange: Exchange) -> Result<&dyn ContractCaller> {
        self.callers
            .get(&exchange)
            .map(|caller| caller.as_ref())
            .ok_or_else(|| Error::validation(format!("no RPC configured for {}", exchange)))
    }

    /// Start watching a position for a tracker.
    ///
    /// A burned id fails with [`Error::Burned`] after marking any existing
    /// rows of that position.
    pub async fn track(
        &self,
        tracker_id: &str,
        display_name: &str,
        position_id: PositionId,
        exchange_name: &str,
    ) -> Result<TrackedPosition> {
        validate_request(tracker_id, position_id)?;
        let descriptor = self.registry.resolve(exchange_name)?;

        let key = RowKey::new(position_id, descriptor.exchange, tracker_id);
        if self.reconciler.store().find(&key).await?.is_some() {
            return Err(Error::DuplicateTracking {
                position_id,
                exchange: descriptor.exchange,
                tracker_id: tracker_id.to_string(),
            });
        }

        let observation = self.observe(descriptor, position_id).await?;
        let row = TrackedPosition::from_read(
            tracker_id,
            display_name,
            descriptor.exchange,
            &observation.read,
            observation.in_range,
        );

        self.reconciler.track(row).await
    }

    pub async fn untrack(&self, tracker_id: &str, position_id: PositionId, exchange_name: &str) -> Result<TrackedPosition> {
        validate_request(tracker_id, position_id)?;
        let descriptor = self.registry.resolve(exchange_name)?;

        self.reconciler
            .untrack(&RowKey::new(position_id, descriptor.exchange, tracker_id))
            .await
    }

    pub async fn untrack_all(&self, tracker_id: &str) -> Result<u64> {
        if tracker_id.trim().is_empty() {
            return Err(Error::validation("tracker id is required"));
        }
        self.reconciler.untrack_all(tracker_id).await
    }

    /// Live state of every non-burned position of the tracker.
    ///
    /// Positions found burned along the way are reconciled and reported as
    /// [`Error::Burned`] in their own entry.
    pub async fn list_positions(&self, tracker_id: &str) -> Result<Vec<PositionReport>> {
        let rows = self.reconciler.list_for_tracker(tracker_id).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let listings = self.price_listings(rows.iter().map(|row| row.exchange).collect()).await;

        let reports = join_all(rows.into_iter().map(|row| {
            let listing = listings.get(&row.exchange);
            async move {
                let status = self.position_status(&row, listing).await;
                if let Err(e) = &status {
                    debug!("Position {} on {} unavailable: {}", row.position_id, row.exchange, e);
                }
                PositionReport { row, status }
            }
        }))
        .await;

        Ok(reports)
    }

    /// Re-read every tracked chain position, reconcile burns and refresh
    /// each tracker's stored range flag. Returns one alert per tracker row
    /// whose flag flipped.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let targets = self.reconciler.tracked_chain_positions().await?;
        let mut report = SweepReport {
            checked: targets.len(),
            ..Default::default()
        };

        let outcomes = join_all(targets.into_iter().map(|(position_id, exchange)| async move {
            (position_id, exchange, self.sweep_one(position_id, exchange).await)
        }))
        .await;

        for (position_id, exchange, outcome) in outcomes {
            match outcome {
                Ok(alerts) => report.alerts.extend(alerts),
                Err(Error::Burned { .. }) => report.burned.push((position_id, exchange)),
                Err(e) => {
                    warn!("Sweep of position {} on {} failed: {}", position_id, exchange, e);
                    report.failures.push((position_id, exchange, e));
                }
            }
        }

        info!(
            "Sweep checked {} positions: {} alerts, {} burned, {} failed",
            report.checked,
            report.alerts.len(),
            report.burned.len(),
            report.failures.len()
        );
        Ok(report)
    }

    async fn sweep_one(&self, position_id: PositionId, exchange: Exchange) -> Result<Vec<RangeAlert>> {
        let descriptor = self.registry.get(exchange)?;
        let observation = self.observe(descriptor, position_id).await?;

        let changes = self
            .reconciler
            .refresh_position(position_id, exchange, observation.in_range)
            .await?;

        Ok(changes
            .into_iter()
            .map(|change| RangeAlert {
                pair: change.row.pair(),
                tracker_id: change.row.tracker_id,
                display_name: change.row.display_name,
                position_id,
                exchange,
                in_range: change.in_range,
                current_tick: observation.snapshot.tick,
                tick_lower: observation.read.position.tick_lower,
                tick_upper: observation.read.position.tick_upper,
            })
            .collect())
    }

    /// position -> pool address -> pool state, reconciling a burn if the
    /// position no longer resolves
    async fn observe(&self, descriptor: &ExchangeDescriptor, position_id: PositionId) -> Result<Observation> {
        let caller = self.caller(descriptor.exchange)?;

        let read = match self.reader.get_position(caller, position_id, descriptor).await {
            Ok(read) => read,
            Err(e @ Error::Burned { .. }) => {
                self.reconciler.reconcile_burn(position_id, descriptor.exchange).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let position = &read.position;
        let pool = PoolAddressResolver::resolve(
            caller,
            descriptor,
            position.token0,
            position.token1,
            position.fee_tier,
            position.tick_spacing,
        )
        .await?;

        let snapshot = PoolStateReader::get_pool_state(caller, pool, descriptor).await?;
        let in_range = range::is_in_range(position.tick_lower, position.tick_upper, snapshot.tick);

        Ok(Observation {
            read,
            snapshot,
            in_range,
        })
    }

    async fn position_status(&self, row: &TrackedPosition, listing: Option<&PriceListing>) -> Result<PositionStatus> {
        let descriptor = self.registry.get(row.exchange)?;
        let observation = self.observe(descriptor, row.position_id).await?;
        let Observation {
            read,
            snapshot,
            in_range,
        } = observation;

        // Only the listing tracker has now seen the new range state
        self.reconciler.refresh_range(&row.key(), in_range).await?;

        let amounts = range::position_amounts(
            &snapshot,
            read.position.tick_lower,
            read.position.tick_upper,
            read.position.liquidity,
            read.token0.decimals,
            read.token1.decimals,
        )?;

        let rewards = if descriptor.has_gauges() {
            self.reward_status(descriptor, snapshot.pool, row.position_id, listing).await
        } else {
            None
        };

        let value_usd = listing.and_then(|l| l.value_of_amounts(&read.position.token0, &read.position.token1, &amounts));

        Ok(PositionStatus {
            pool: snapshot.pool,
            current_tick: snapshot.tick,
            in_range,
            liquidity: read.position.liquidity,
            amounts,
            rewards,
            value_usd,
        })
    }

    /// Rewards are supplementary: a pool without a gauge or a failing gauge
    /// read leaves them unknown instead of failing the position.
    async fn reward_status(
        &self,
        descriptor: &ExchangeDescriptor,
        pool: Address,
        position_id: PositionId,
        listing: Option<&PriceListing>,
    ) -> Option<RewardStatus> {
        let caller = self.caller(descriptor.exchange).ok()?;

        let pending = match RewardAggregator::get_pending_rewards(caller, pool, descriptor, position_id).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Rewards for position {} on {} unavailable: {}", position_id, descriptor.exchange, e);
                return None;
            }
        };

        let (symbol, decimals) = match self
            .reader
            .metadata()
            .resolve(caller, descriptor.chain_id, pending.reward_token)
            .await
        {
            Ok(meta) => (meta.symbol, meta.decimals),
            Err(e) => {
                warn!("Reward token {} metadata unavailable: {}", pending.reward_token, e);
                return None;
            }
        };

        let value_usd = listing
            .and_then(|l| l.price_of(&pending.reward_token))
            .map(|price| price * to_f64(pending.amount, decimals));

        Some(RewardStatus {
            display: format_amount(pending.amount, decimals),
            symbol,
            value_usd,
            pending,
        })
    }

    /// One listing per exchange; a failed fetch just means no values
    async fn price_listings(&self, exchanges: BTreeSet<Exchange>) -> HashMap<Exchange, PriceListing> {
        let Some(client) = &self.prices else {
            return HashMap::new();
        };

        let fetches = exchanges.into_iter().filter_map(|exchange| {
            let descriptor = self.registry.get(exchange).ok()?;
            Some(async move { (exchange, client.fetch_prices(descriptor).await) })
        });

        join_all(fetches)
            .await
            .into_iter()
            .filter_map(|(exchange, result)| match result {
                Ok(listing) => listing.map(|l| (exchange, l)),
                Err(e) => {
                    warn!("Price listing for {} unavailable: {}", exchange, e);
                    None
                }
            })
            .collect()
    }
}

fn validate_request(tracker_id: &str, position_id: PositionId) -> Result<()> {
    if tracker_id.trim().is_empty() {
        return Err(Error::validation("tracker id is required"));
    }
    if position_id == 0 {
        return Err(Error::validation("position id must be greater than zero"));
    }
    Ok(())
}

/// Pending reward amount is zero
pub fn is_dust(rewards: &RewardStatus) -> bool {
    rewards.pending.amount == U256::ZERO
}
