//! Error types for the scan core and its store adapters.

use thiserror::Error;

use crate::offset::ShardId;

/// Failures raised by the row store, offset store and lease collaborators.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Postgres query or connection failure.
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis command or connection failure.
    #[cfg(feature = "database")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A table or column name that cannot be interpolated into SQL.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A row the store returned is missing its scan key or has a bad one.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Outage reported by the in-memory stores' failure injection.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the scan core.
///
/// Per-shard variants (`StorageUnavailable`, `OffsetStoreUnavailable`,
/// `InvalidOffset`, `TaskFailed`) are reported through the scan stream and do
/// not end a run. The remaining variants are raised before scanning starts or
/// stop the run outright.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The row store failed while scanning a shard.
    #[error("Row store unavailable for shard {shard}: {source}")]
    StorageUnavailable {
        /// Shard whose scan failed.
        shard: ShardId,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Reading or writing a shard's durable offset failed.
    #[error("Offset store unavailable for shard {shard}: {source}")]
    OffsetStoreUnavailable {
        /// Shard whose offset could not be read or written.
        shard: ShardId,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// A stored offset that does not parse as the configured kind.
    #[error("Stored offset {value:?} for shard {shard} cannot be decoded")]
    InvalidOffset {
        /// Shard owning the offset.
        shard: ShardId,
        /// Raw stored value.
        value: String,
    },

    /// A scan task panicked or was cancelled.
    #[error("Scan task for shard {shard} failed: {message}")]
    TaskFailed {
        /// Shard the task was scanning.
        shard: ShardId,
        /// Join error text.
        message: String,
    },

    /// Rejected request or routing argument.
    #[error("Invalid shard argument: {0}")]
    InvalidShardArgument(String),

    /// The layout resolved to zero shard tables.
    #[error("No shards configured")]
    NoShardsConfigured,

    /// Another owner holds the scan lease.
    #[error("Scan lease {key} is held by another owner")]
    LeaseUnavailable {
        /// Lease key.
        key: String,
    },

    /// The lease expired or was taken over mid-run.
    #[error("Scan lease {key} was lost")]
    LeaseLost {
        /// Lease key.
        key: String,
    },

    /// The lease store could not be reached.
    #[error("Scan lease store error: {0}")]
    LeaseStore(#[source] StoreError),

    /// Store failure outside a shard scan, such as a routed lookup.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanError {
    /// Shard the error belongs to, when it is a per-shard failure.
    pub fn shard(&self) -> Option<ShardId> {
        match self {
            ScanError::StorageUnavailable { shard, .. }
            | ScanError::OffsetStoreUnavailable { shard, .. }
            | ScanError::InvalidOffset { shard, .. }
            | ScanError::TaskFailed { shard, .. } => Some(*shard),
            _ => None,
        }
    }

    /// Whether the error ends the run rather than one shard's attempt.
    pub fn is_fatal(&self) -> bool {
        self.shard().is_none()
    }
}

/// Result alias defaulting to [`ScanError`].
pub type Result<T, E = ScanError> = std::result::Result<T, E>;
