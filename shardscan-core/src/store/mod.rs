//! Ports for the row store and the offset store, plus adapters.
//!
//! The scan core only talks to these traits; handles are injected through
//! constructors so tests can swap in the in-memory adapters.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{error::StoreError, offset::Offset, record::Row};

/// In-memory stores.
pub mod memory;
/// Postgres row store.
#[cfg(feature = "database")]
pub mod postgres;
/// Redis offset store and lease.
#[cfg(feature = "database")]
pub mod redis;

pub use self::memory::{MemoryOffsetStore, MemoryRowStore};
#[cfg(feature = "database")]
pub use self::postgres::PostgresRowStore;
#[cfg(feature = "database")]
pub use self::redis::{RedisOffsetStore, RedisScanLease};

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("table name pattern compiles")
});

static COLUMN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("column name pattern compiles")
});

/// Accepts `table` or `schema.table`.
pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    if TABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Accepts a bare column name.
pub fn validate_column_name(name: &str) -> Result<(), StoreError> {
    if COLUMN_NAME.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Result of a single-row write.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WriteOutcome {
    /// Rows changed by the statement.
    pub affected: u64,
    /// Key assigned by an insert, when one happened.
    pub inserted_id: Option<i64>,
}

impl WriteOutcome {
    /// Whether any row changed.
    pub fn changed(&self) -> bool {
        self.affected > 0
    }
}

/// Read access to the physical tables behind the shards.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Up to `limit` rows with `scan_key > after`, ascending by `scan_key`.
    /// Rows whose scan key is `NULL` never match.
    async fn query_range(
        &self,
        table: &str,
        scan_key: &str,
        after: &Offset,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError>;

    /// Every row whose `scan_key` equals `value`.
    async fn query_group(
        &self,
        table: &str,
        scan_key: &str,
        value: &Offset,
    ) -> Result<Vec<Row>, StoreError>;

    /// First row matching all `filters` (column equality, `null` matches
    /// `NULL`).
    async fn point_lookup(&self, table: &str, filters: &Row) -> Result<Option<Row>, StoreError>;

    /// Up to `limit` rows matching all `filters`.
    async fn lookup_many(
        &self,
        table: &str,
        filters: &Row,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError>;

    /// Update by `id` when the row carries a non-null `id`, otherwise insert
    /// and ignore conflicts.
    async fn write(&self, table: &str, row: &Row) -> Result<WriteOutcome, StoreError>;
}

/// Flat string map holding one durable offset per shard field.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Stored value of `field`, if any.
    async fn get_field(&self, field: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite `field`.
    async fn set_field(&self, field: &str, value: &str) -> Result<(), StoreError>;
}
