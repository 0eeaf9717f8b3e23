//! In-process ledger, used for `DATABASE_PATH=:memory:` and in tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{PositionId, PositionStore, RowKey, TrackedPosition};
use crate::error::Result;
use crate::exchanges::Exchange;

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<RowKey, TrackedPosition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

fn same_position(row: &TrackedPosition, position_id: PositionId, exchange: Exchange) -> bool {
    row.position_id == position_id && row.exchange == exchange
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn find(&self, key: &RowKey) -> Result<Option<TrackedPosition>> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn find_by_position(&self, position_id: PositionId, exchange: Exchange) -> Result<Vec<TrackedPosition>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| same_position(row, position_id, exchange))
            .cloned()
            .collect())
    }

    async fn insert(&self, row: &TrackedPosition) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let key = row.key();
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, row.clone());
        Ok(true)
    }

    async fn delete(&self, key: &RowKey) -> Result<bool> {
        Ok(self.rows.write().await.remove(key).is_some())
    }

    async fn delete_tracker(&self, tracker_id: &str) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|key, _| key.tracker_id != tracker_id);
        Ok((before - rows.len()) as u64)
    }

    async fn set_in_range(&self, key: &RowKey, in_range: bool) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(key) {
            Some(row) if row.in_range != in_range => {
                row.in_range = in_range;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_burned(&self, position_id: PositionId, exchange: Exchange) -> Result<u64> {
        // One write guard for the whole fan-out
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for row in rows
            .values_mut()
            .filter(|row| same_position(row, position_id, exchange) && !row.burned)
        {
            row.burned = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn list_for_tracker(&self, tracker_id: &str) -> Result<Vec<TrackedPosition>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| row.tracker_id == tracker_id && !row.burned)
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<TrackedPosition>> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|row| !row.burned).cloned().collect())
    }
}
