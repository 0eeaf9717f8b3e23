//! Ledger state machine
//!
//! Every operation touches only one tracker's rows, except burn
//! reconciliation: a burn is a chain fact and fans out to every tracker of
//! the position. Range refresh is per row, so one tracker looking at a
//! position never consumes another tracker's pending range change.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{PositionId, PositionStore, RowKey, TrackedPosition};
use crate::error::{Error, Result};
use crate::exchanges::Exchange;

/// A tracker row whose stored in-range flag was flipped by a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeChange {
    pub row: TrackedPosition,
    pub in_range: bool,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn PositionStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    /// Insert a new row; an existing row for the same key is left as is
    pub async fn track(&self, row: TrackedPosition) -> Result<TrackedPosition> {
        if !self.store.insert(&row).await? {
            debug!(
                "Position {} on {} already tracked by {}",
                row.position_id, row.exchange, row.tracker_id
            );
            return Err(Error::DuplicateTracking {
                position_id: row.position_id,
                exchange: row.exchange,
                tracker_id: row.tracker_id,
            });
        }

        info!(
            "Tracking position {} on {} for {} ({}, in range: {})",
            row.position_id,
            row.exchange,
            row.tracker_id,
            row.pair(),
            row.in_range
        );
        Ok(row)
    }

    /// Remove one tracker's row, returning what was removed
    pub async fn untrack(&self, key: &RowKey) -> Result<TrackedPosition> {
        let not_tracked = || Error::NotTracked {
            position_id: key.position_id,
            exchange: key.exchange,
            tracker_id: key.tracker_id.clone(),
        };

        let row = self.store.find(key).await?.ok_or_else(not_tracked)?;
        // A concurrent untrack may have won between find and delete
        if !self.store.delete(key).await? {
            return Err(not_tracked());
        }

        info!("Untracked position {} on {} for {}", key.position_id, key.exchange, key.tracker_id);
        Ok(row)
    }

    pub async fn untrack_all(&self, tracker_id: &str) -> Result<u64> {
        let removed = self.store.delete_tracker(tracker_id).await?;
        info!("Untracked {} positions for {}", removed, tracker_id);
        Ok(removed)
    }

    /// Mark every row of a burned chain position. Rows are kept.
    pub async fn reconcile_burn(&self, position_id: PositionId, exchange: Exchange) -> Result<u64> {
        let changed = self.store.mark_burned(position_id, exchange).await?;
        if changed > 0 {
            warn!("Position {} on {} was burned, {} tracker rows marked", position_id, exchange, changed);
        }
        Ok(changed)
    }

    /// Overwrite the stored in-range flag of one tracker's row.
    /// Returns the change if the row is live and its flag actually flipped;
    /// a repeat refresh with the same flag returns `None` and writes nothing.
    pub async fn refresh_range(&self, key: &RowKey, in_range: bool) -> Result<Option<RangeChange>> {
        let row = match self.store.find(key).await? {
            Some(row) if !row.burned && row.in_range != in_range => row,
            _ => return Ok(None),
        };

        if !self.store.set_in_range(key, in_range).await? {
            return Ok(None);
        }

        debug!(
            "Position {} on {} is now {} for {}",
            key.position_id,
            key.exchange,
            if in_range { "in range" } else { "out of range" },
            key.tracker_id
        );
        Ok(Some(RangeChange { row, in_range }))
    }

    /// Refresh each tracker's row of the chain position on its own
    pub async fn refresh_position(
        &self,
        position_id: PositionId,
        exchange: Exchange,
        in_range: bool,
    ) -> Result<Vec<RangeChange>> {
        let mut changes = Vec::new();
        for row in self.store.find_by_position(position_id, exchange).await? {
            if let Some(change) = self.refresh_range(&row.key(), in_range).await? {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    pub async fn list_for_tracker(&self, tracker_id: &str) -> Result<Vec<TrackedPosition>> {
        self.store.list_for_tracker(tracker_id).await
    }

    /// Distinct chain positions watched by at least one tracker
    pub async fn tracked_chain_positions(&self) -> Result<BTreeSet<(PositionId, Exchange)>> {
        let rows = self.store.list_active().await?;
        Ok(rows.into_iter().map(|row| (row.position_id, row.exchange)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::sample_row;
    use crate::ledger::{MemoryStore, SqliteStore};
    use tempfile::TempDir;

    fn memory_reconciler() -> Reconciler {
        Reconciler::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_duplicate_guard_leaves_one_row() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(71255, Exchange::Nile, "alice")).await.unwrap();

        let err = reconciler.track(sample_row(71255, Exchange::Nile, "alice")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateTracking { position_id: 71255, exchange: Exchange::Nile, .. }));
        assert_eq!(reconciler.store().find_by_position(71255, Exchange::Nile).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_track_untrack_round_trip_keeps_other_tracker() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(71255, Exchange::Nile, "bob")).await.unwrap();
        reconciler.track(sample_row(71255, Exchange::Nile, "alice")).await.unwrap();

        let removed = reconciler.untrack(&RowKey::new(71255, Exchange::Nile, "alice")).await.unwrap();
        assert_eq!(removed.tracker_id, "alice");

        let store = reconciler.store();
        assert!(store.find(&RowKey::new(71255, Exchange::Nile, "alice")).await.unwrap().is_none());
        let bob = store.find(&RowKey::new(71255, Exchange::Nile, "bob")).await.unwrap().unwrap();
        assert_eq!(bob, sample_row(71255, Exchange::Nile, "bob"));
    }

    #[tokio::test]
    async fn test_untrack_missing_row() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(71255, Exchange::Nile, "bob")).await.unwrap();

        let err = reconciler.untrack(&RowKey::new(71255, Exchange::Nile, "alice")).await.unwrap_err();
        assert!(matches!(err, Error::NotTracked { .. }));
    }

    #[tokio::test]
    async fn test_untrack_all_spans_exchanges() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(1, Exchange::Nile, "alice")).await.unwrap();
        reconciler.track(sample_row(2, Exchange::Cleo, "alice")).await.unwrap();
        reconciler.track(sample_row(1, Exchange::Nile, "bob")).await.unwrap();

        assert_eq!(reconciler.untrack_all("alice").await.unwrap(), 2);
        assert!(reconciler.list_for_tracker("alice").await.unwrap().is_empty());
        assert_eq!(reconciler.list_for_tracker("bob").await.unwrap().len(), 1);
        assert_eq!(reconciler.untrack_all("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_burn_fans_out_to_every_tracker() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(71255, Exchange::Nile, "alice")).await.unwrap();
        reconciler.track(sample_row(71255, Exchange::Nile, "bob")).await.unwrap();
        reconciler.track(sample_row(71255, Exchange::Ramses, "bob")).await.unwrap();

        assert_eq!(reconciler.reconcile_burn(71255, Exchange::Nile).await.unwrap(), 2);

        let rows = reconciler.store().find_by_position(71255, Exchange::Nile).await.unwrap();
        assert_eq!(rows.len(), 2, "burned rows are not deleted");
        assert!(rows.iter().all(|row| row.burned));

        let bob = reconciler.list_for_tracker("bob").await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].exchange, Exchange::Ramses);

        let chain: Vec<_> = reconciler.tracked_chain_positions().await.unwrap().into_iter().collect();
        assert_eq!(chain, vec![(71255, Exchange::Ramses)]);
    }

    #[tokio::test]
    async fn test_burn_fan_out_on_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("positions.db").to_string_lossy().to_string();
        let reconciler = Reconciler::new(Arc::new(SqliteStore::open(&db_path).await.unwrap()));
        reconciler.track(sample_row(71255, Exchange::Nile, "alice")).await.unwrap();
        reconciler.track(sample_row(71255, Exchange::Nile, "bob")).await.unwrap();

        assert_eq!(reconciler.reconcile_burn(71255, Exchange::Nile).await.unwrap(), 2);
        let rows = reconciler.store().find_by_position(71255, Exchange::Nile).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.burned));
    }

    #[tokio::test]
    async fn test_refresh_position_is_idempotent() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(9, Exchange::Pharaoh, "alice")).await.unwrap();
        reconciler.track(sample_row(9, Exchange::Pharaoh, "bob")).await.unwrap();

        let first = reconciler.refresh_position(9, Exchange::Pharaoh, false).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|change| !change.in_range && change.row.in_range));

        let second = reconciler.refresh_position(9, Exchange::Pharaoh, false).await.unwrap();
        assert!(second.is_empty());

        let rows = reconciler.store().find_by_position(9, Exchange::Pharaoh).await.unwrap();
        assert!(rows.iter().all(|row| !row.in_range && !row.burned));
    }

    #[tokio::test]
    async fn test_refresh_range_leaves_other_trackers_pending() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(9, Exchange::Pharaoh, "alice")).await.unwrap();
        reconciler.track(sample_row(9, Exchange::Pharaoh, "bob")).await.unwrap();

        let bob = RowKey::new(9, Exchange::Pharaoh, "bob");
        let change = reconciler.refresh_range(&bob, false).await.unwrap().unwrap();
        assert_eq!(change.row.tracker_id, "bob");
        assert!(reconciler.refresh_range(&bob, false).await.unwrap().is_none());

        let pending = reconciler.refresh_position(9, Exchange::Pharaoh, false).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].row.tracker_id, "alice");
    }

    #[tokio::test]
    async fn test_refresh_range_skips_burned_and_missing_rows() {
        let reconciler = memory_reconciler();
        reconciler.track(sample_row(9, Exchange::Pharaoh, "alice")).await.unwrap();
        reconciler.reconcile_burn(9, Exchange::Pharaoh).await.unwrap();

        let alice = RowKey::new(9, Exchange::Pharaoh, "alice");
        assert!(reconciler.refresh_range(&alice, false).await.unwrap().is_none());
        assert!(reconciler.refresh_position(9, Exchange::Pharaoh, false).await.unwrap().is_empty());
        assert!(reconciler
            .refresh_range(&RowKey::new(9, Exchange::Pharaoh, "carol"), false)
            .await
            .unwrap()
            .is_none());

        let row = reconciler.store().find(&alice).await.unwrap().unwrap();
        assert!(row.burned, "refresh never clears burned");
        assert!(row.in_range);
    }
}
