//! One shard, one batch.
//!
//! A scan reads rows with `scan_key > offset` in ascending order and stops
//! on a scan-key boundary, so two consecutive batches never split rows that
//! share a scan-key value.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, warn};

use crate::{
    config::{GroupPolicy, ScannerConfig},
    error::StoreError,
    offset::{Offset, ShardId},
    record::{RecordDecoder, Row},
    store::{RowStore, WriteOutcome},
};

/// Columns dropped from rows before [`ShardScanner::save`]; the table
/// maintains them itself.
const MANAGED_COLUMNS: &[&str] = &["create_time", "update_time"];

/// Result of one scan call.
#[derive(Clone, Debug)]
pub struct ScanPage<R> {
    /// Scan key of the last row included, or the input offset when nothing
    /// matched.
    pub next_offset: Offset,
    /// Decoded records, in scan-key order.
    pub records: Vec<R>,
    /// Rows read from the store, including ones the decoder rejected.
    pub rows_scanned: usize,
}

impl<R> ScanPage<R> {
    /// Whether a scan starting at `from` found nothing new.
    pub fn is_exhausted(&self, from: &Offset) -> bool {
        self.next_offset == *from
    }
}

/// Limits for [`ShardScanner::stream`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamOptions {
    /// Stop after this many records.
    pub total: Option<usize>,
    /// Keep polling for new rows at this interval instead of ending once the
    /// table is exhausted.
    pub follow: Option<Duration>,
}

/// Scans one physical table of the logical sharded table.
pub struct ShardScanner<D: RecordDecoder> {
    shard: ShardId,
    table: Arc<str>,
    store: Arc<dyn RowStore>,
    decoder: Arc<D>,
    config: ScannerConfig,
}

impl<D: RecordDecoder> Clone for ShardScanner<D> {
    fn clone(&self) -> Self {
        Self {
            shard: self.shard,
            table: Arc::clone(&self.table),
            store: Arc::clone(&self.store),
            decoder: Arc::clone(&self.decoder),
            config: self.config.clone(),
        }
    }
}

impl<D: RecordDecoder> fmt::Debug for ShardScanner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardScanner")
            .field("shard", &self.shard)
            .field("table", &self.table)
            .field("batch_size", &self.config.batch_size)
            .field("group_policy", &self.config.group_policy)
            .finish()
    }
}

impl<D: RecordDecoder> ShardScanner<D> {
    /// `table` is the physical table backing `shard`.
    pub fn new(
        shard: ShardId,
        table: impl Into<Arc<str>>,
        store: Arc<dyn RowStore>,
        decoder: Arc<D>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            shard,
            table: table.into(),
            store,
            decoder,
            config,
        }
    }

    /// Shard this scanner reads.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Physical table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Configured nominal batch size.
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Reads roughly `limit` rows after `offset`.
    ///
    /// Once `limit` rows are included, the batch ends at the first row whose
    /// scan key differs from its predecessor, so the returned offset closes a
    /// complete scan-key group. "No more rows" is an unchanged offset, never
    /// an error.
    pub async fn scan(
        &self,
        offset: &Offset,
        scan_key: &str,
        limit: usize,
    ) -> Result<ScanPage<D::Record>, StoreError> {
        let kind = offset.kind();
        let fetch_limit = self.config.fetch_limit(limit);
        let mut rows = self
            .store
            .query_range(&self.table, scan_key, offset, fetch_limit)
            .await?;
        let fetched = rows.len();

        let mut keys = Vec::with_capacity(fetched);
        let mut cut = fetched;
        for (position, row) in rows.iter().enumerate() {
            let key = row
                .get(scan_key)
                .and_then(|value| kind.from_json(value))
                .ok_or_else(|| {
                    StoreError::Decode(format!(
                        "{} row {position} has no {kind} value in {scan_key}",
                        self.table
                    ))
                })?;
            if position >= limit && keys.last() != Some(&key) {
                cut = position;
                break;
            }
            keys.push(key);
        }
        rows.truncate(cut);

        // A full window without a boundary past `limit` ends inside a group.
        if cut == fetched && fetched >= fetch_limit && limit > 0 {
            if let Some(last) = keys.last().cloned() {
                match self.config.group_policy {
                    GroupPolicy::Complete => {
                        let group_start = keys.iter().position(|key| *key == last).unwrap_or(0);
                        let group = self.store.query_group(&self.table, scan_key, &last).await?;
                        debug!(
                            shard = %self.shard,
                            table = %self.table,
                            key = %last,
                            in_window = keys.len() - group_start,
                            group = group.len(),
                            "completed trailing scan-key group"
                        );
                        rows.truncate(group_start);
                        keys.truncate(group_start);
                        keys.extend(std::iter::repeat_n(last, group.len()));
                        rows.extend(group);
                    }
                    GroupPolicy::Margin => {
                        warn!(
                            shard = %self.shard,
                            table = %self.table,
                            key = %last,
                            fetch_limit,
                            "scan-key group fills the over-fetch window and may be split"
                        );
                    }
                }
            }
        }

        let next_offset = keys.last().cloned().unwrap_or_else(|| offset.clone());
        let rows_scanned = rows.len();
        let records = self.decode_rows(rows);

        Ok(ScanPage {
            next_offset,
            records,
            rows_scanned,
        })
    }

    fn decode_rows(&self, rows: Vec<Row>) -> Vec<D::Record> {
        rows.into_iter()
            .filter_map(|row| match self.decoder.decode(row) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(shard = %self.shard, table = %self.table, error = %err, "skipping undecodable row");
                    None
                }
            })
            .collect()
    }

    /// Walks this table from `start` as a record stream, batch by batch.
    pub fn stream(
        &self,
        start: Offset,
        scan_key: &str,
        options: StreamOptions,
    ) -> impl Stream<Item = Result<D::Record, StoreError>> + Send + use<D> {
        let scanner = self.clone();
        let scan_key = scan_key.to_string();

        async_stream::stream! {
            let mut offset = start;
            let mut emitted = 0usize;
            'batches: loop {
                let page = match scanner.scan(&offset, &scan_key, scanner.batch_size()).await {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        break 'batches;
                    }
                };
                info!(table = %scanner.table, from = %offset, to = %page.next_offset, "table scan batch");

                for record in page.records {
                    yield Ok(record);
                    emitted += 1;
                    if options.total.is_some_and(|total| emitted >= total) {
                        break 'batches;
                    }
                }

                if page.next_offset == offset {
                    match options.follow {
                        Some(interval) => {
                            debug!(table = %scanner.table, ?interval, "table exhausted, waiting for new rows");
                            tokio::time::sleep(interval).await;
                        }
                        None => break 'batches,
                    }
                }
                offset = page.next_offset;
            }
        }
    }

    /// First row matching every `filters` column, decoded.
    pub async fn get(&self, filters: &Row) -> Result<Option<D::Record>, StoreError> {
        match self.store.point_lookup(&self.table, filters).await? {
            Some(row) => Ok(self.decode_rows(vec![row]).pop()),
            None => Ok(None),
        }
    }

    /// Rows matching `filters`, at most `limit` when given.
    /// Rows that fail to decode are skipped.
    pub async fn get_many(&self, filters: &Row, limit: Option<usize>) -> Result<Vec<D::Record>, StoreError> {
        let limit = limit.unwrap_or(self.config.batch_size);
        let rows = self.store.lookup_many(&self.table, filters, limit).await?;
        Ok(self.decode_rows(rows))
    }

    /// Updates by `id` when present, otherwise inserts ignoring conflicts.
    pub async fn save(&self, row: &Row) -> Result<WriteOutcome, StoreError> {
        let mut row = row.clone();
        for column in MANAGED_COLUMNS {
            row.remove(*column);
        }
        let outcome = self.store.write(&self.table, &row).await?;
        if outcome.affected > 1 {
            warn!(table = %self.table, affected = outcome.affected, "write touched more than one row");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RowDecoder;
    use crate::store::MemoryRowStore;
    use futures::StreamExt;
    use serde_json::{Value, json};

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn keyed(keys: &[i64]) -> Vec<Row> {
        keys.iter()
            .enumerate()
            .map(|(seq, k)| row(json!({"k": k, "seq": seq})))
            .collect()
    }

    fn scanner(store: Arc<MemoryRowStore>, config: ScannerConfig) -> ShardScanner<RowDecoder> {
        ShardScanner::new(ShardId(0), "t_000", store, Arc::new(RowDecoder), config)
    }

    fn keys_of(records: &[Row]) -> Vec<i64> {
        records.iter().filter_map(|r| r["k"].as_i64()).collect()
    }

    #[tokio::test]
    async fn extends_past_limit_to_close_a_group() {
        let store = Arc::new(MemoryRowStore::new());
        store.extend("t_000", keyed(&[1, 2, 2, 3]));
        let scanner = scanner(store.clone(), ScannerConfig::default());

        let first = scanner.scan(&Offset::Int(0), "k", 2).await.expect("first");
        assert_eq!(first.next_offset, Offset::Int(2));
        assert_eq!(keys_of(&first.records), vec![1, 2, 2]);

        let second = scanner.scan(&first.next_offset, "k", 2).await.expect("second");
        assert_eq!(second.next_offset, Offset::Int(3));
        assert_eq!(keys_of(&second.records), vec![3]);

        let third = scanner.scan(&second.next_offset, "k", 2).await.expect("third");
        assert!(third.is_exhausted(&Offset::Int(3)));
        assert!(third.records.is_empty());
    }

    #[tokio::test]
    async fn stops_at_first_boundary_after_limit() {
        let store = Arc::new(MemoryRowStore::new());
        store.extend("t_000", keyed(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]));
        let scanner = scanner(store.clone(), ScannerConfig::default());

        let page = scanner.scan(&Offset::Int(0), "k", 10).await.expect("page");
        assert_eq!(page.next_offset, Offset::Int(10));
        assert_eq!(page.records.len(), 10);
        assert_eq!(store.group_queries("t_000"), 0);
    }

    #[tokio::test]
    async fn complete_policy_fetches_groups_larger_than_the_margin() {
        let store = Arc::new(MemoryRowStore::new());
        store.extend("t_000", keyed(&[1, 5, 5, 5, 5, 5, 5, 9]));
        let scanner = scanner(store.clone(), ScannerConfig::default());

        let page = scanner.scan(&Offset::Int(0), "k", 2).await.expect("page");
        assert_eq!(page.next_offset, Offset::Int(5));
        assert_eq!(keys_of(&page.records), vec![1, 5, 5, 5, 5, 5, 5]);
        assert_eq!(store.group_queries("t_000"), 1);

        let seqs: Vec<_> = page.records.iter().filter_map(|r| r["seq"].as_i64()).collect();
        let mut unique = seqs.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), seqs.len(), "group rows must not repeat");
    }

    #[tokio::test]
    async fn margin_policy_keeps_the_window() {
        let store = Arc::new(MemoryRowStore::new());
        store.extend("t_000", keyed(&[1, 5, 5, 5, 5, 5, 5, 9]));
        let config = ScannerConfig {
            group_policy: GroupPolicy::Margin,
            ..ScannerConfig::default()
        };
        let scanner = scanner(store.clone(), config);

        let page = scanner.scan(&Offset::Int(0), "k", 2).await.expect("page");
        assert_eq!(keys_of(&page.records), vec![1, 5, 5]);
        assert_eq!(store.group_queries("t_000"), 0);
    }

    #[tokio::test]
    async fn undecodable_rows_are_skipped_but_consumed() {
        #[derive(Debug, serde::Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: String,
        }

        let store = Arc::new(MemoryRowStore::new());
        store.extend(
            "t_000",
            [
                row(json!({"k": 1, "name": "a"})),
                row(json!({"k": 2})),
                row(json!({"k": 3, "name": "c"})),
            ],
        );
        let scanner = ShardScanner::new(
            ShardId(0),
            "t_000",
            store,
            Arc::new(crate::record::EntityDecoder::<Named>::new()),
            ScannerConfig::default(),
        );

        let page = scanner.scan(&Offset::Int(0), "k", 10).await.expect("page");
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.rows_scanned, 3);
        assert_eq!(page.next_offset, Offset::Int(3));
    }

    #[tokio::test]
    async fn storage_errors_propagate() {
        let store = Arc::new(MemoryRowStore::new());
        store.fail_next("t_000", 1);
        let scanner = scanner(store, ScannerConfig::default());
        assert!(scanner.scan(&Offset::Int(0), "k", 2).await.is_err());
    }

    #[tokio::test]
    async fn stream_walks_the_table_and_honours_total() {
        let store = Arc::new(MemoryRowStore::new());
        store.extend("t_000", keyed(&[1, 2, 3, 4, 5, 6, 7]));
        let config = ScannerConfig {
            batch_size: 2,
            ..ScannerConfig::default()
        };
        let scanner = scanner(store, config);

        let all: Vec<_> = scanner
            .stream(Offset::Int(0), "k", StreamOptions::default())
            .collect()
            .await;
        let all: Vec<Row> = all.into_iter().collect::<Result<_, _>>().expect("no errors");
        assert_eq!(keys_of(&all), vec![1, 2, 3, 4, 5, 6, 7]);

        let capped: Vec<_> = scanner
            .stream(
                Offset::Int(2),
                "k",
                StreamOptions {
                    total: Some(3),
                    follow: None,
                },
            )
            .collect()
            .await;
        assert_eq!(capped.len(), 3);
    }

    #[tokio::test]
    async fn save_drops_managed_columns() {
        let store = Arc::new(MemoryRowStore::new());
        let scanner = scanner(store.clone(), ScannerConfig::default());

        let outcome = scanner
            .save(&row(json!({"name": "acme", "update_time": "2024-01-01 00:00:00"})))
            .await
            .expect("insert");
        assert_eq!(outcome.inserted_id, Some(1));

        let stored = scanner
            .get(&row(json!({"id": 1})))
            .await
            .expect("lookup")
            .expect("row exists");
        assert!(!stored.contains_key("update_time"));
        assert_eq!(stored["name"], json!("acme"));
    }
}
