//! Shared fixtures for scheduler integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};
use shardscan_core::{
    Batch, OffsetKind, Row, ScanError, ScanStream, ShardId,
    config::{ScannerConfig, SchedulerConfig},
    layout::ModuloLayout,
    offsets::OffsetTracker,
    record::RowDecoder,
    scheduler::ScanScheduler,
    store::{MemoryOffsetStore, MemoryRowStore},
    table::ShardedTable,
};

pub const SCAN_KEY: &str = "k";

/// Idle wait used by every fixture scheduler (ms).
pub const IDLE_WAIT_MS: u64 = 10;

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Rows carrying `keys` in order, each tagged with a sequence number unique
/// within the shard.
pub fn keyed_rows(keys: &[i64]) -> Vec<Row> {
    keys.iter()
        .enumerate()
        .map(|(seq, key)| row(json!({ SCAN_KEY: key, "seq": seq })))
        .collect()
}

pub struct Fixture {
    pub rows: Arc<MemoryRowStore>,
    pub offsets: Arc<MemoryOffsetStore>,
    pub table: ShardedTable<RowDecoder>,
    pub kind: OffsetKind,
}

impl Fixture {
    /// One shard table `t_{i:03}` per entry of `shards`.
    pub fn new(shards: &[&[i64]], batch_size: usize) -> Self {
        Self::with_stores(shards, batch_size, MemoryRowStore::new(), MemoryOffsetStore::new())
    }

    pub fn with_stores(
        shards: &[&[i64]],
        batch_size: usize,
        rows: MemoryRowStore,
        offsets: MemoryOffsetStore,
    ) -> Self {
        for (index, keys) in shards.iter().enumerate() {
            rows.extend(&table_name(index), keyed_rows(keys));
        }
        Self::build(shards.len(), batch_size, rows, offsets, OffsetKind::Int)
    }

    /// Shards holding arbitrary rows, scanned with offsets of `kind`.
    pub fn with_rows(shards: Vec<Vec<Row>>, batch_size: usize, kind: OffsetKind) -> Self {
        let rows = MemoryRowStore::new();
        let shard_count = shards.len();
        for (index, shard_rows) in shards.into_iter().enumerate() {
            rows.extend(&table_name(index), shard_rows);
        }
        Self::build(shard_count, batch_size, rows, MemoryOffsetStore::new(), kind)
    }

    fn build(
        shard_count: usize,
        batch_size: usize,
        rows: MemoryRowStore,
        offsets: MemoryOffsetStore,
        kind: OffsetKind,
    ) -> Self {
        let rows = Arc::new(rows);
        let table = ShardedTable::new(
            Arc::new(ModuloLayout::new("t", shard_count)),
            rows.clone(),
            RowDecoder,
            SCAN_KEY,
            ScannerConfig {
                batch_size,
                ..ScannerConfig::default()
            },
        )
        .expect("sharded table");

        Self {
            rows,
            offsets: Arc::new(offsets),
            table,
            kind,
        }
    }

    pub fn scheduler(&self) -> ScanScheduler<RowDecoder> {
        let tracker = OffsetTracker::new(self.offsets.clone(), self.kind);
        let config = SchedulerConfig {
            idle_wait_ms: IDLE_WAIT_MS,
            ..SchedulerConfig::default()
        };
        self.table.scheduler(tracker, config).expect("scheduler")
    }

    /// Raw stored offset of `shard`.
    pub fn stored(&self, shard: usize) -> Option<String> {
        self.offsets.field(&format!("{shard:03}"))
    }

    pub fn offset(&self, shard: usize) -> Option<i64> {
        self.offsets
            .field(&format!("{shard:03}"))
            .and_then(|raw| raw.parse().ok())
    }
}

pub fn table_name(index: usize) -> String {
    format!("t_{index:03}")
}

/// Everything a run yielded, split into batches and errors.
#[derive(Debug, Default)]
pub struct Drained {
    pub batches: Vec<Batch<Row>>,
    pub errors: Vec<ScanError>,
}

impl Drained {
    pub fn shard_batches(&self, shard: usize) -> Vec<&Batch<Row>> {
        self.batches
            .iter()
            .filter(|batch| batch.shard == ShardId(shard))
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

pub async fn drain(mut stream: ScanStream<Row>) -> Drained {
    let mut drained = Drained::default();
    while let Some(item) = stream.next().await {
        match item {
            Ok(batch) => drained.batches.push(batch),
            Err(err) => drained.errors.push(err),
        }
    }
    drained
}

pub fn keys(records: &[Row]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|record| record.get(SCAN_KEY).and_then(Value::as_i64))
        .collect()
}

/// Rows keyed by arbitrary JSON scan-key values, tagged with `seq`.
pub fn rows_with_keys(keys: &[Value]) -> Vec<Row> {
    keys.iter()
        .enumerate()
        .map(|(seq, key)| row(json!({ SCAN_KEY: key, "seq": seq })))
        .collect()
}

/// Sequence numbers delivered per shard, in delivery order.
pub fn delivered_seqs<'a>(batches: impl IntoIterator<Item = &'a Batch<Row>>) -> BTreeMap<usize, Vec<i64>> {
    let mut delivered: BTreeMap<usize, Vec<i64>> = BTreeMap::new();
    for batch in batches {
        let entry = delivered.entry(batch.shard.index()).or_default();
        entry.extend(
            batch
                .records
                .iter()
                .filter_map(|record| record.get("seq").and_then(Value::as_i64)),
        );
    }
    delivered
}

/// `(key, seq)` pairs delivered per shard, in delivery order.
pub fn deliveries<'a>(batches: impl IntoIterator<Item = &'a Batch<Row>>) -> BTreeMap<usize, Vec<(i64, i64)>> {
    let mut delivered: BTreeMap<usize, Vec<(i64, i64)>> = BTreeMap::new();
    for batch in batches {
        let entry = delivered.entry(batch.shard.index()).or_default();
        for record in &batch.records {
            let key = record.get(SCAN_KEY).and_then(Value::as_i64).unwrap_or_default();
            let seq = record.get("seq").and_then(Value::as_i64).unwrap_or_default();
            entry.push((key, seq));
        }
    }
    delivered
}
