//! A logical table spread over shard tables.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{
    config::{ScannerConfig, SchedulerConfig},
    error::{Result, ScanError},
    layout::ShardLayout,
    offset::ShardId,
    offsets::OffsetTracker,
    record::{RecordDecoder, Row},
    scanner::ShardScanner,
    scheduler::ScanScheduler,
    store::{RowStore, WriteOutcome, validate_column_name, validate_table_name},
};

/// Routes lookups and writes by the sharding key and builds the per-shard
/// scanners for a [`ScanScheduler`].
pub struct ShardedTable<D: RecordDecoder> {
    layout: Arc<dyn ShardLayout>,
    sharding_key: String,
    scanners: Vec<ShardScanner<D>>,
}

impl<D: RecordDecoder> fmt::Debug for ShardedTable<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedTable")
            .field("layout", &self.layout)
            .field("sharding_key", &self.sharding_key)
            .field("shard_count", &self.scanners.len())
            .finish()
    }
}

impl<D: RecordDecoder> ShardedTable<D> {
    /// One scanner per table of `layout`. Fails when the layout yields no
    /// tables or a name is not a safe identifier.
    pub fn new(
        layout: Arc<dyn ShardLayout>,
        store: Arc<dyn RowStore>,
        decoder: D,
        sharding_key: impl Into<String>,
        config: ScannerConfig,
    ) -> Result<Self> {
        let sharding_key = sharding_key.into();
        validate_column_name(&sharding_key)?;

        let tables = layout.tables();
        if tables.is_empty() {
            return Err(ScanError::NoShardsConfigured);
        }

        let decoder = Arc::new(decoder);
        let scanners = tables
            .into_iter()
            .enumerate()
            .map(|(index, table)| -> Result<ShardScanner<D>> {
                validate_table_name(&table)?;
                Ok(ShardScanner::new(
                    ShardId(index),
                    table,
                    Arc::clone(&store),
                    Arc::clone(&decoder),
                    config.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(shards = scanners.len(), sharding_key = %sharding_key, "sharded table ready");
        Ok(Self {
            layout,
            sharding_key,
            scanners,
        })
    }

    /// Number of shard tables.
    pub fn shard_count(&self) -> usize {
        self.scanners.len()
    }

    /// Column writes and lookups are routed by.
    pub fn sharding_key(&self) -> &str {
        &self.sharding_key
    }

    /// Scanners indexed by shard.
    pub fn scanners(&self) -> &[ShardScanner<D>] {
        &self.scanners
    }

    /// Scanner of `shard`, if it exists.
    pub fn scanner(&self, shard: ShardId) -> Option<&ShardScanner<D>> {
        self.scanners.get(shard.index())
    }

    /// Scanners for every shard, coordinated through `tracker`.
    pub fn scheduler(&self, tracker: OffsetTracker, config: SchedulerConfig) -> Result<ScanScheduler<D>> {
        ScanScheduler::new(self.scanners.clone(), tracker, config)
    }

    /// Shard holding rows whose sharding key equals `value`.
    pub fn shard_for(&self, value: &Value) -> Result<ShardId> {
        match self.layout.shard_of(value) {
            Some(index) if index < self.scanners.len() => Ok(ShardId(index)),
            Some(index) => Err(ScanError::InvalidShardArgument(format!(
                "layout routed {value} to shard {index} of {}",
                self.scanners.len()
            ))),
            None => Err(ScanError::InvalidShardArgument(format!(
                "{} value {value} cannot be routed",
                self.sharding_key
            ))),
        }
    }

    fn route(&self, row: &Row) -> Result<&ShardScanner<D>> {
        let value = row
            .get(&self.sharding_key)
            .filter(|value| !value.is_null())
            .ok_or_else(|| ScanError::InvalidShardArgument(format!("missing sharding key {}", self.sharding_key)))?;
        let shard = self.shard_for(value)?;
        Ok(&self.scanners[shard.index()])
    }

    /// First record matching `filters`, which must include the sharding key.
    pub async fn get(&self, filters: &Row) -> Result<Option<D::Record>> {
        Ok(self.route(filters)?.get(filters).await?)
    }

    /// Records matching `filters` on the shard the sharding key routes to.
    pub async fn get_many(&self, filters: &Row, limit: Option<usize>) -> Result<Vec<D::Record>> {
        Ok(self.route(filters)?.get_many(filters, limit).await?)
    }

    /// Write `row` to the shard its sharding key routes to.
    pub async fn save(&self, row: &Row) -> Result<WriteOutcome> {
        Ok(self.route(row)?.save(row).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ModuloLayout;
    use crate::record::RowDecoder;
    use crate::store::MemoryRowStore;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn table(store: Arc<MemoryRowStore>) -> ShardedTable<RowDecoder> {
        ShardedTable::new(
            Arc::new(ModuloLayout::new("company", 4)),
            store,
            RowDecoder,
            "cid",
            ScannerConfig::default(),
        )
        .expect("table")
    }

    #[tokio::test]
    async fn writes_and_reads_route_by_sharding_key() {
        let store = Arc::new(MemoryRowStore::new());
        let table = table(store.clone());

        table
            .save(&row(json!({"cid": 10, "name": "acme"})))
            .await
            .expect("save");
        assert_eq!(store.row_count("company_002"), 1);

        let found = table
            .get(&row(json!({"cid": 10})))
            .await
            .expect("get")
            .expect("present");
        assert_eq!(found["name"], json!("acme"));

        let many = table
            .get_many(&row(json!({"cid": 10})), Some(5))
            .await
            .expect("get_many");
        assert_eq!(many.len(), 1);
    }

    #[tokio::test]
    async fn missing_sharding_key_is_rejected() {
        let table = table(Arc::new(MemoryRowStore::new()));
        let err = table.get(&row(json!({"name": "acme"}))).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidShardArgument(_)));
        let err = table.save(&row(json!({"cid": null}))).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidShardArgument(_)));
    }

    #[test]
    fn empty_layouts_have_no_shards() {
        let err = ShardedTable::new(
            Arc::new(ModuloLayout::new("company", 0)),
            Arc::new(MemoryRowStore::new()),
            RowDecoder,
            "cid",
            ScannerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::NoShardsConfigured));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let err = ShardedTable::new(
            Arc::new(ModuloLayout::new("company;", 2)),
            Arc::new(MemoryRowStore::new()),
            RowDecoder,
            "cid",
            ScannerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Store(_)));
    }
}
