//! Postgres row store.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use tracing::debug;

use super::{RowStore, WriteOutcome, validate_column_name, validate_table_name};
use crate::{error::StoreError, offset::Offset, record::Row};

/// Row store over a Postgres pool. Rows are projected with `to_jsonb(t)` so
/// any table can be read as a generic [`Row`].
#[derive(Clone)]
pub struct PostgresRowStore {
    pool: PgPool,
}

impl PostgresRowStore {
    /// Store reading through `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl fmt::Debug for PostgresRowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRowStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

fn push_offset(builder: &mut QueryBuilder<'_, Postgres>, offset: &Offset) {
    match offset {
        Offset::Int(value) => builder.push_bind(*value),
        Offset::Text(value) => builder.push_bind(value.clone()),
        Offset::Timestamp(value) => builder.push_bind(*value),
    };
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => builder.push("NULL"),
        Value::Bool(flag) => builder.push_bind(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => builder.push_bind(int),
            None => builder.push_bind(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => builder.push_bind(text.clone()),
        Value::Array(_) | Value::Object(_) => builder.push_bind(Json(value.clone())),
    };
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &Row) -> Result<(), StoreError> {
    if filters.is_empty() {
        return Ok(());
    }
    builder.push(" WHERE ");
    for (position, (column, value)) in filters.iter().enumerate() {
        validate_column_name(column)?;
        if position > 0 {
            builder.push(" AND ");
        }
        builder.push("t.").push(column);
        if value.is_null() {
            builder.push(" IS NULL");
        } else {
            builder.push(" = ");
            push_value(builder, value);
        }
    }
    Ok(())
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn into_rows(rows: Vec<Json<Row>>) -> Vec<Row> {
    rows.into_iter().map(|Json(row)| row).collect()
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn query_range(
        &self,
        table: &str,
        scan_key: &str,
        after: &Offset,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        validate_table_name(table)?;
        validate_column_name(scan_key)?;

        let mut builder = QueryBuilder::<Postgres>::new("SELECT to_jsonb(t) FROM ");
        builder.push(table).push(" AS t WHERE t.").push(scan_key).push(" > ");
        push_offset(&mut builder, after);
        builder
            .push(" ORDER BY t.")
            .push(scan_key)
            .push(" ASC LIMIT ")
            .push_bind(limit_param(limit));

        debug!(table, scan_key, after = %after, limit, "range query");
        let rows: Vec<Json<Row>> = builder.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(into_rows(rows))
    }

    async fn query_group(
        &self,
        table: &str,
        scan_key: &str,
        value: &Offset,
    ) -> Result<Vec<Row>, StoreError> {
        validate_table_name(table)?;
        validate_column_name(scan_key)?;

        let mut builder = QueryBuilder::<Postgres>::new("SELECT to_jsonb(t) FROM ");
        builder.push(table).push(" AS t WHERE t.").push(scan_key).push(" = ");
        push_offset(&mut builder, value);

        debug!(table, scan_key, value = %value, "group query");
        let rows: Vec<Json<Row>> = builder.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(into_rows(rows))
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
        validate_table_name(table)?;

        let mut builder = QueryBuilder::<Postgres>::new("SELECT to_jsonb(t) FROM ");
        builder.push(table).push(" AS t");
        push_filters(&mut builder, filters)?;
        builder.push(" LIMIT ").push_bind(limit_param(limit));

        let rows: Vec<Json<Row>> = builder.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(into_rows(rows))
    }

    async fn write(&self, table: &str, row: &Row) -> Result<WriteOutcome, StoreError> {
        validate_table_name(table)?;

        let id = row.get("id").filter(|id| !id.is_null());
        let columns: Vec<(&String, &Value)> = row.iter().filter(|(column, _)| *column != "id").collect();
        for (column, _) in &columns {
            validate_column_name(column)?;
        }

        match id {
            Some(id) => {
                if columns.is_empty() {
                    return Ok(WriteOutcome::default());
                }
                let mut builder = QueryBuilder::<Postgres>::new("UPDATE ");
                builder.push(table).push(" SET ");
                for (position, (column, value)) in columns.iter().enumerate() {
                    if position > 0 {
                        builder.push(", ");
                    }
                    builder.push(*column).push(" = ");
                    push_value(&mut builder, value);
                }
                builder.push(" WHERE id = ");
                push_value(&mut builder, id);

                let result = builder.build().execute(&self.pool).await?;
                Ok(WriteOutcome {
                    affected: result.rows_affected(),
                    inserted_id: None,
                })
            }
            None => {
                let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO ");
                builder.push(table);
                if columns.is_empty() {
                    builder.push(" DEFAULT VALUES");
                } else {
                    builder.push(" (");
                    let mut separated = builder.separated(", ");
                    for (column, _) in &columns {
                        separated.push(*column);
                    }
                    builder.push(") VALUES (");
                    for (position, (_, value)) in columns.iter().enumerate() {
                        if position > 0 {
                            builder.push(", ");
                        }
                        push_value(&mut builder, value);
                    }
                    builder.push(")");
                }
                builder.push(" ON CONFLICT DO NOTHING RETURNING id::bigint");

                let inserted: Option<i64> = builder
                    .build_query_scalar()
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(WriteOutcome {
                    affected: u64::from(inserted.is_some()),
                    inserted_id: inserted,
                })
            }
        }
    }
}
