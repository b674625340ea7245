//! In-process adapters with failure injection, used by tests and dry runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{OffsetStore, RowStore, WriteOutcome};
use crate::{error::StoreError, offset::Offset, record::Row};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_failure(failures: &mut HashMap<String, usize>, key: &str) -> bool {
    match failures.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[derive(Default)]
struct TableState {
    tables: HashMap<String, Vec<Row>>,
    failures: HashMap<String, usize>,
    range_queries: HashMap<String, usize>,
    group_queries: HashMap<String, usize>,
}

/// Row store backed by in-memory tables. Rows keep insertion order, which
/// is the tie-break among equal scan keys.
#[derive(Default)]
pub struct MemoryRowStore {
    state: Mutex<TableState>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl fmt::Debug for MemoryRowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryRowStore")
            .field("table_count", &state.tables.len())
            .field("latency", &self.latency)
            .finish()
    }
}

impl MemoryRowStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every range and group query, so scans overlap in time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Append `row` to `table`.
    pub fn insert(&self, table: &str, row: Row) {
        lock(&self.state)
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Append `rows` to `table`.
    pub fn extend<I>(&self, table: &str, rows: I)
    where
        I: IntoIterator<Item = Row>,
    {
        lock(&self.state)
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make the next `count` range/group queries against `table` fail.
    pub fn fail_next(&self, table: &str, count: usize) {
        lock(&self.state).failures.insert(table.to_string(), count);
    }

    /// Rows currently in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.state).tables.get(table).map_or(0, Vec::len)
    }

    /// Range queries issued against `table`.
    pub fn range_queries(&self, table: &str) -> usize {
        lock(&self.state).range_queries.get(table).copied().unwrap_or(0)
    }

    /// Group queries issued against `table`.
    pub fn group_queries(&self, table: &str) -> usize {
        lock(&self.state).group_queries.get(table).copied().unwrap_or(0)
    }

    /// Most range/group queries observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn matches_filters(row: &Row, filters: &Row) -> bool {
    filters.iter().all(|(column, expected)| match expected {
        Value::Null => row.get(column).is_none_or(Value::is_null),
        _ => row.get(column) == Some(expected),
    })
}

fn max_int_id(rows: &[Row]) -> i64 {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(Value::as_i64))
        .max()
        .unwrap_or(0)
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn query_range(
        &self,
        table: &str,
        scan_key: &str,
        after: &Offset,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        self.simulate_latency().await;
        let mut state = lock(&self.state);
        *state.range_queries.entry(table.to_string()).or_default() += 1;
        if take_failure(&mut state.failures, table) {
            return Err(StoreError::Unavailable(format!("{table} is unreachable")));
        }

        let kind = after.kind();
        let mut matched: Vec<(Offset, &Row)> = state
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|row| {
                let key = row.get(scan_key).and_then(|value| kind.from_json(value))?;
                (key > *after).then_some((key, row))
            })
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(matched
            .into_iter()
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn query_group(
        &self,
        table: &str,
        scan_key: &str,
        value: &Offset,
    ) -> Result<Vec<Row>, StoreError> {
        self.simulate_latency().await;
        let mut state = lock(&self.state);
        *state.group_queries.entry(table.to_string()).or_default() += 1;
        if take_failure(&mut state.failures, table) {
            return Err(StoreError::Unavailable(format!("{table} is unreachable")));
        }

        Ok(state
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|row| row.get(scan_key).is_some_and(|key| value.matches_json(key)))
            .cloned()
            .collect())
    }

    async fn point_lookup(&self, table: &str, filters: &Row) -> Result<Option<Row>, StoreError> {
        Ok(self.lookup_many(table, filters, 1).await?.into_iter().next())
    }

    async fn lookup_many(
        &self,
        table: &str,
        filters: &Row,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let state = lock(&self.state);
        Ok(state
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|row| matches_filters(row, filters))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn write(&self, table: &str, row: &Row) -> Result<WriteOutcome, StoreError> {
        let mut state = lock(&self.state);
        let rows = state.tables.entry(table.to_string()).or_default();

        match row.get("id").filter(|id| !id.is_null()) {
            Some(id) => {
                let Some(existing) = rows.iter_mut().find(|r| r.get("id") == Some(id)) else {
                    return Ok(WriteOutcome::default());
                };
                let mut changed = false;
                for (column, value) in row {
                    if existing.get(column) != Some(value) {
                        existing.insert(column.clone(), value.clone());
                        changed = true;
                    }
                }
                Ok(WriteOutcome {
                    affected: u64::from(changed),
                    inserted_id: None,
                })
            }
            None => {
                let id = max_int_id(rows) + 1;
                let mut inserted = row.clone();
                inserted.insert("id".to_string(), Value::from(id));
                rows.push(inserted);
                Ok(WriteOutcome {
                    affected: 1,
                    inserted_id: Some(id),
                })
            }
        }
    }
}

#[derive(Default)]
struct FieldState {
    fields: HashMap<String, String>,
    read_failures: usize,
    write_failures: usize,
    writes: usize,
}

/// Offset store backed by a process-local map.
#[derive(Default)]
pub struct MemoryOffsetStore {
    state: Mutex<FieldState>,
}

impl fmt::Debug for MemoryOffsetStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryOffsetStore")
            .field("field_count", &state.fields.len())
            .field("writes", &state.writes)
            .finish()
    }
}

impl MemoryOffsetStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `fields`.
    pub fn with_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        lock(&store.state)
            .fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        store
    }

    /// Make the next `count` reads fail.
    pub fn fail_reads(&self, count: usize) {
        lock(&self.state).read_failures = count;
    }

    /// Make the next `count` writes fail.
    pub fn fail_writes(&self, count: usize) {
        lock(&self.state).write_failures = count;
    }

    /// Current raw value of `field`.
    pub fn field(&self, field: &str) -> Option<String> {
        lock(&self.state).fields.get(field).cloned()
    }

    /// Overwrite a field out of band, as an operator would.
    pub fn put(&self, field: &str, value: &str) {
        lock(&self.state)
            .fields
            .insert(field.to_string(), value.to_string());
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        lock(&self.state).writes
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn get_field(&self, field: &str) -> Result<Option<String>, StoreError> {
        let mut state = lock(&self.state);
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(StoreError::Unavailable("offset store read failed".into()));
        }
        Ok(state.fields.get(field).cloned())
    }

    async fn set_field(&self, field: &str, value: &str) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(StoreError::Unavailable("offset store write failed".into()));
        }
        state.fields.insert(field.to_string(), value.to_string());
        state.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn range_queries_are_ordered_and_exclusive() {
        let store = MemoryRowStore::new();
        store.extend(
            "t",
            [
                row(json!({"k": 3, "v": "c"})),
                row(json!({"k": 1, "v": "a"})),
                row(json!({"k": null, "v": "n"})),
                row(json!({"k": 2, "v": "b"})),
            ],
        );

        let rows = store
            .query_range("t", "k", &Offset::Int(1), 10)
            .await
            .expect("query");
        let keys: Vec<_> = rows.iter().map(|r| r["k"].clone()).collect();
        assert_eq!(keys, vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryRowStore::new();
        store.insert("t", row(json!({"k": 1})));
        store.fail_next("t", 1);

        assert!(store.query_range("t", "k", &Offset::Int(0), 10).await.is_err());
        assert_eq!(
            store
                .query_range("t", "k", &Offset::Int(0), 10)
                .await
                .expect("second attempt")
                .len(),
            1
        );
        assert_eq!(store.range_queries("t"), 2);
    }

    #[tokio::test]
    async fn write_updates_by_id_or_inserts() {
        let store = MemoryRowStore::new();
        let inserted = store
            .write("t", &row(json!({"name": "a"})))
            .await
            .expect("insert");
        assert_eq!(inserted.inserted_id, Some(1));

        let unchanged = store
            .write("t", &row(json!({"id": 1, "name": "a"})))
            .await
            .expect("noop update");
        assert!(!unchanged.changed());

        let updated = store
            .write("t", &row(json!({"id": 1, "name": "b"})))
            .await
            .expect("update");
        assert_eq!(updated.affected, 1);

        let found = store
            .point_lookup("t", &row(json!({"name": "b"})))
            .await
            .expect("lookup");
        assert_eq!(found.and_then(|r| r.get("id").cloned()), Some(json!(1)));
    }

    #[tokio::test]
    async fn offset_store_failures_do_not_write() {
        let store = MemoryOffsetStore::with_fields([("000", "5")]);
        store.fail_writes(1);
        assert!(store.set_field("000", "9").await.is_err());
        assert_eq!(store.field("000").as_deref(), Some("5"));
        store.set_field("000", "9").await.expect("write");
        assert_eq!(store.get_field("000").await.expect("read").as_deref(), Some("9"));
        assert_eq!(store.writes(), 1);
    }
}
