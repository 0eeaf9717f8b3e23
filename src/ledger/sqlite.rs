//! SQLite-backed ledger

use alloy_primitives::Address;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{PositionId, PositionStore, RowKey, TrackedPosition};
use crate::error::{Error, Result};
use crate::exchanges::Exchange;

const COLUMNS: &str = "position_id, exchange, tracker_id, display_name, burned, in_range, \
     token0, token1, token0_symbol, token1_symbol, token0_decimals, token1_decimals, \
     fee_tier, tick_spacing, tick_lower, tick_upper, liquidity, owner, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and apply the schema
    pub async fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::transient(format!("creating {}: {}", parent.display(), e)))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas(conn).await }))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await?;

        run_migrations(&pool).await?;

        info!("Position ledger opened at {}", db_path);
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema_sql = include_str!("schema.sql");

    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    Ok(())
}

async fn configure_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
    sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
    Ok(())
}

fn db_id(position_id: PositionId) -> Result<i64> {
    i64::try_from(position_id).map_err(|_| Error::validation(format!("position id {} is too large", position_id)))
}

fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw).map_err(|e| Error::transient(format!("corrupt address {:?} in ledger: {}", raw, e)))
}

fn small_int<T: TryFrom<i64>>(raw: i64, column: &str) -> Result<T> {
    T::try_from(raw).map_err(|_| Error::transient(format!("corrupt {} {} in ledger", column, raw)))
}

fn row_to_position(row: &SqliteRow) -> Result<TrackedPosition> {
    let exchange: String = row.try_get("exchange")?;
    let token0: String = row.try_get("token0")?;
    let token1: String = row.try_get("token1")?;
    let owner: String = row.try_get("owner")?;

    Ok(TrackedPosition {
        position_id: small_int(row.try_get::<i64, _>("position_id")?, "position_id")?,
        exchange: Exchange::from_str(&exchange)
            .map_err(|_| Error::transient(format!("unknown exchange {:?} in ledger", exchange)))?,
        tracker_id: row.try_get("tracker_id")?,
        display_name: row.try_get("display_name")?,
        burned: row.try_get("burned")?,
        in_range: row.try_get("in_range")?,
        token0: parse_address(&token0)?,
        token1: parse_address(&token1)?,
        token0_symbol: row.try_get("token0_symbol")?,
        token1_symbol: row.try_get("token1_symbol")?,
        token0_decimals: small_int(row.try_get::<i64, _>("token0_decimals")?, "token0_decimals")?,
        token1_decimals: small_int(row.try_get::<i64, _>("token1_decimals")?, "token1_decimals")?,
        fee_tier: small_int(row.try_get::<i64, _>("fee_tier")?, "fee_tier")?,
        tick_spacing: row.try_get("tick_spacing")?,
        tick_lower: row.try_get("tick_lower")?,
        tick_upper: row.try_get("tick_upper")?,
        liquidity: row.try_get("liquidity")?,
        owner: parse_address(&owner)?,
        created_at: row.try_get("created_at")?,
    })
}

fn rows_to_positions(rows: &[SqliteRow]) -> Result<Vec<TrackedPosition>> {
    rows.iter().map(row_to_position).collect()
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn find(&self, key: &RowKey) -> Result<Option<TrackedPosition>> {
        let sql = format!(
            "SELECT {} FROM tracked_positions WHERE position_id = ? AND exchange = ? AND tracker_id = ?",
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(db_id(key.position_id)?)
            .bind(key.exchange.as_str())
            .bind(key.tracker_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_position).transpose()
    }

    async fn find_by_position(&self, position_id: PositionId, exchange: Exchange) -> Result<Vec<TrackedPosition>> {
        let sql = format!(
            "SELECT {} FROM tracked_positions WHERE position_id = ? AND exchange = ? ORDER BY tracker_id",
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(db_id(position_id)?)
            .bind(exchange.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows_to_positions(&rows)
    }

    async fn insert(&self, row: &TrackedPosition) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tracked_positions (
                position_id, exchange, tracker_id, display_name, burned, in_range,
                token0, token1, token0_symbol, token1_symbol, token0_decimals, token1_decimals,
                fee_tier, tick_spacing, tick_lower, tick_upper, liquidity, owner, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(position_id, exchange, tracker_id) DO NOTHING
            "#,
        )
        .bind(db_id(row.position_id)?)
        .bind(row.exchange.as_str())
        .bind(row.tracker_id.as_str())
        .bind(row.display_name.as_str())
        .bind(row.burned)
        .bind(row.in_range)
        .bind(row.token0.to_checksum(None))
        .bind(row.token1.to_checksum(None))
        .bind(row.token0_symbol.as_str())
        .bind(row.token1_symbol.as_str())
        .bind(i64::from(row.token0_decimals))
        .bind(i64::from(row.token1_decimals))
        .bind(i64::from(row.fee_tier))
        .bind(row.tick_spacing)
        .bind(row.tick_lower)
        .bind(row.tick_upper)
        .bind(row.liquidity.as_str())
        .bind(row.owner.to_checksum(None))
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, key: &RowKey) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM tracked_positions WHERE position_id = ? AND exchange = ? AND tracker_id = ?")
                .bind(db_id(key.position_id)?)
                .bind(key.exchange.as_str())
                .bind(key.tracker_id.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_tracker(&self, tracker_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tracked_positions WHERE tracker_id = ?")
            .bind(tracker_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn set_in_range(&self, key: &RowKey, in_range: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tracked_positions SET in_range = ? \
             WHERE position_id = ? AND exchange = ? AND tracker_id = ? AND in_range != ?",
        )
        .bind(in_range)
        .bind(db_id(key.position_id)?)
        .bind(key.exchange.as_str())
        .bind(key.tracker_id.as_str())
        .bind(in_range)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_burned(&self, position_id: PositionId, exchange: Exchange) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE tracked_positions SET burned = 1 WHERE position_id = ? AND exchange = ? AND burned = 0")
                .bind(db_id(position_id)?)
                .bind(exchange.as_str())
                .execute(&mut *tx)
                .await?;

        tx.commit().await?;

        debug!("Burn fan-out for {} on {} touched {} rows", position_id, exchange, result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn list_for_tracker(&self, tracker_id: &str) -> Result<Vec<TrackedPosition>> {
        let sql = format!(
            "SELECT {} FROM tracked_positions WHERE tracker_id = ? AND burned = 0 ORDER BY created_at, id",
            COLUMNS
        );
        let rows = sqlx::query(&sql).bind(tracker_id).fetch_all(&self.pool).await?;

        rows_to_positions(&rows)
    }

    async fn list_active(&self) -> Result<Vec<TrackedPosition>> {
        let sql = format!("SELECT {} FROM tracked_positions WHERE burned = 0 ORDER BY id", COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows_to_positions(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::sample_row;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("positions.db").to_string_lossy().to_string();
        let store = SqliteStore::open(&db_path).await.expect("open failed");
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_open_creates_table() {
        let (_dir, store) = open_temp().await;
        let result: (String,) =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='tracked_positions'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(result.0, "tracked_positions");
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("positions.db").to_string_lossy().to_string();
        let first = SqliteStore::open(&db_path).await.unwrap();
        first.insert(&sample_row(1, Exchange::Nile, "alice")).await.unwrap();
        drop(first);

        let second = SqliteStore::open(&db_path).await.unwrap();
        assert_eq!(second.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_row_round_trips_through_columns() {
        let (_dir, store) = open_temp().await;
        let mut row = sample_row(71255, Exchange::Aerodrome, "alice");
        row.tick_spacing = Some(100);
        row.fee_tier = 0;
        row.tick_lower = -887200;

        assert!(store.insert(&row).await.unwrap());
        let found = store.find(&row.key()).await.unwrap().unwrap();
        assert_eq!(found, row);
    }

    #[tokio::test]
    async fn test_unique_key_rejects_duplicate() {
        let (_dir, store) = open_temp().await;
        let row = sample_row(71255, Exchange::Nile, "alice");
        assert!(store.insert(&row).await.unwrap());
        assert!(!store.insert(&row).await.unwrap());
        assert!(store.insert(&sample_row(71255, Exchange::Nile, "bob")).await.unwrap());
        assert_eq!(store.find_by_position(71255, Exchange::Nile).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_burn_fan_out_keeps_rows() {
        let (_dir, store) = open_temp().await;
        store.insert(&sample_row(71255, Exchange::Nile, "alice")).await.unwrap();
        store.insert(&sample_row(71255, Exchange::Nile, "bob")).await.unwrap();

        assert_eq!(store.mark_burned(71255, Exchange::Nile).await.unwrap(), 2);
        assert_eq!(store.mark_burned(71255, Exchange::Nile).await.unwrap(), 0);

        let rows = store.find_by_position(71255, Exchange::Nile).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.burned));
        assert!(store.list_for_tracker("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_in_range_and_deletes() {
        let (_dir, store) = open_temp().await;
        store.insert(&sample_row(5, Exchange::Ramses, "alice")).await.unwrap();
        store.insert(&sample_row(6, Exchange::Ramses, "alice")).await.unwrap();
        store.insert(&sample_row(5, Exchange::Ramses, "bob")).await.unwrap();

        let alice = RowKey::new(5, Exchange::Ramses, "alice");
        assert!(!store.set_in_range(&alice, true).await.unwrap());
        assert!(store.set_in_range(&alice, false).await.unwrap());
        assert!(!store.find(&alice).await.unwrap().unwrap().in_range);
        let bob = store.find(&RowKey::new(5, Exchange::Ramses, "bob")).await.unwrap().unwrap();
        assert!(bob.in_range, "other trackers keep their own flag");
        assert!(store.delete(&RowKey::new(5, Exchange::Ramses, "bob")).await.unwrap());

        assert!(store.delete(&RowKey::new(5, Exchange::Ramses, "alice")).await.unwrap());
        assert!(!store.delete(&RowKey::new(5, Exchange::Ramses, "alice")).await.unwrap());
        assert_eq!(store.delete_tracker("alice").await.unwrap(), 1);
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_position_id_is_rejected() {
        let (_dir, store) = open_temp().await;
        let err = store.find(&RowKey::new(u64::MAX, Exchange::Nile, "alice")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
