//! Tracking ledger
//!
//! One row per (position id, exchange, tracker). Several trackers may watch
//! the same chain position; each keeps its own row and its own display name.
//! Burn is a chain-level fact and is written across every tracker's row at
//! once. The in-range flag is what a tracker last saw and lives on its own row.

mod memory;
mod reconciler;
mod sqlite;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chain::PositionRead;
use crate::error::Result;
use crate::exchanges::Exchange;

pub use memory::MemoryStore;
pub use reconciler::Reconciler;
pub use sqlite::SqliteStore;

/// NFT token id on the exchange's position manager
pub type PositionId = u64;

/// Unique key of a ledger row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub position_id: PositionId,
    pub exchange: Exchange,
    pub tracker_id: String,
}

impl RowKey {
    pub fn new(position_id: PositionId, exchange: Exchange, tracker_id: impl Into<String>) -> Self {
        Self {
            position_id,
            exchange,
            tracker_id: tracker_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub position_id: PositionId,
    pub exchange: Exchange,
    pub tracker_id: String,
    pub display_name: String,
    pub burned: bool,
    pub in_range: bool,
    pub token0: Address,
    pub token1: Address,
    pub token0_symbol: String,
    pub token1_symbol: String,
    pub token0_decimals: u8,
    pub token1_decimals: u8,
    pub fee_tier: u32,
    pub tick_spacing: Option<i32>,
    pub tick_lower: i32,
    pub tick_upper: i32,
    /// Decimal string; u128 does not fit the store's integer column
    pub liquidity: String,
    pub owner: Address,
    /// Unix milliseconds
    pub created_at: i64,
}

impl TrackedPosition {
    /// Snapshot a freshly read position into a new row
    pub fn from_read(
        tracker_id: impl Into<String>,
        display_name: impl Into<String>,
        exchange: Exchange,
        read: &PositionRead,
        in_range: bool,
    ) -> Self {
        Self {
            position_id: read.position_id,
            exchange,
            tracker_id: tracker_id.into(),
            display_name: display_name.into(),
            burned: false,
            in_range,
            token0: read.position.token0,
            token1: read.position.token1,
            token0_symbol: read.token0.symbol.clone(),
            token1_symbol: read.token1.symbol.clone(),
            token0_decimals: read.token0.decimals,
            token1_decimals: read.token1.decimals,
            fee_tier: read.position.fee_tier,
            tick_spacing: read.position.tick_spacing,
            tick_lower: read.position.tick_lower,
            tick_upper: read.position.tick_upper,
            liquidity: read.position.liquidity_string(),
            owner: read.position.owner,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn key(&self) -> RowKey {
        RowKey::new(self.position_id, self.exchange, self.tracker_id.clone())
    }

    pub fn pair(&self) -> String {
        format!("{}/{}", self.token0_symbol, self.token1_symbol)
    }
}

/// Backing store for ledger rows.
///
/// Single-row operations must be atomic on their own. `mark_burned` touches
/// every row of a chain position and should be atomic where the store can
/// do it.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn find(&self, key: &RowKey) -> Result<Option<TrackedPosition>>;

    /// Every row for the chain position, burned rows included
    async fn find_by_position(&self, position_id: PositionId, exchange: Exchange) -> Result<Vec<TrackedPosition>>;

    /// `false` if a row with the same key already exists
    async fn insert(&self, row: &TrackedPosition) -> Result<bool>;

    /// `false` if there was no such row
    async fn delete(&self, key: &RowKey) -> Result<bool>;

    /// Removes every row of the tracker, returns how many
    async fn delete_tracker(&self, tracker_id: &str) -> Result<u64>;

    /// Overwrite the in-range flag of one row. `false` if the row is
    /// missing or already held that value.
    async fn set_in_range(&self, key: &RowKey, in_range: bool) -> Result<bool>;

    /// Set `burned` on every row of the chain position that is not burned
    /// yet. Returns the number of rows changed.
    async fn mark_burned(&self, position_id: PositionId, exchange: Exchange) -> Result<u64>;

    /// Non-burned rows of the tracker
    async fn list_for_tracker(&self, tracker_id: &str) -> Result<Vec<TrackedPosition>>;

    /// Non-burned rows of every tracker
    async fn list_active(&self) -> Result<Vec<TrackedPosition>>;
}
