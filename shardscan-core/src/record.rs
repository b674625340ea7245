//! Decoding of raw rows into the records handed to callers.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// A raw row as returned by a row store: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Pure mapping from a raw row to the record type yielded by scans.
pub trait RecordDecoder: Send + Sync + 'static {
    /// Record type yielded in batches.
    type Record: Send + 'static;

    /// Map one row. An error skips the row.
    fn decode(&self, row: Row) -> Result<Self::Record, StoreError>;
}

/// Yields rows unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct RowDecoder;

impl RecordDecoder for RowDecoder {
    type Record = Row;

    fn decode(&self, row: Row) -> Result<Row, StoreError> {
        Ok(row)
    }
}

/// Deserializes rows into a typed entity with serde.
pub struct EntityDecoder<T> {
    _entity: PhantomData<fn() -> T>,
}

impl<T> EntityDecoder<T> {
    /// Decoder for `T`.
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<T> Default for EntityDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EntityDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EntityDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDecoder")
            .field("entity", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> RecordDecoder for EntityDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Record = T;

    fn decode(&self, row: Row) -> Result<T, StoreError> {
        serde_json::from_value(serde_json::Value::Object(row))
            .map_err(|e| StoreError::Decode(format!("{}: {e}", std::any::type_name::<T>())))
    }
}
