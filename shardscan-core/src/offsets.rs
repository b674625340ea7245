//! Durable per-shard offsets.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::{
    error::{Result, ScanError},
    offset::{Offset, OffsetKind, ShardId},
    store::OffsetStore,
};

/// Reads and writes shard offsets through an [`OffsetStore`].
///
/// The store is the source of truth. Callers re-read it whenever a shard is
/// idle because an operator or another process may have moved it.
#[derive(Clone)]
pub struct OffsetTracker {
    store: Arc<dyn OffsetStore>,
    kind: OffsetKind,
}

impl fmt::Debug for OffsetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffsetTracker")
            .field("kind", &self.kind)
            .finish()
    }
}

impl OffsetTracker {
    /// Tracker reading and writing `kind` offsets through `store`.
    pub fn new(store: Arc<dyn OffsetStore>, kind: OffsetKind) -> Self {
        Self { store, kind }
    }

    /// Kind every stored offset is parsed as.
    pub fn kind(&self) -> OffsetKind {
        self.kind
    }

    /// Durable offset of `shard`, `None` when it was never seeded.
    pub async fn get(&self, shard: ShardId) -> Result<Option<Offset>> {
        let raw = self
            .store
            .get_field(&shard.field_key())
            .await
            .map_err(|source| ScanError::OffsetStoreUnavailable { shard, source })?;

        match raw {
            None => Ok(None),
            Some(value) => match self.kind.parse(&value) {
                Some(offset) => Ok(Some(offset)),
                None => Err(ScanError::InvalidOffset { shard, value }),
            },
        }
    }

    /// Overwrite the durable offset of `shard`.
    pub async fn set(&self, shard: ShardId, offset: &Offset) -> Result<()> {
        debug_assert_eq!(offset.kind(), self.kind, "offset kind mismatch for shard {shard}");
        self.store
            .set_field(&shard.field_key(), &offset.encode())
            .await
            .map_err(|source| ScanError::OffsetStoreUnavailable { shard, source })?;
        debug!(shard = %shard, offset = %offset, "offset stored");
        Ok(())
    }

    /// Writes `start` only when the shard has no durable offset yet, and
    /// returns the offset now in effect.
    pub async fn ensure_seeded(&self, shard: ShardId, start: &Offset) -> Result<Offset> {
        match self.get(shard).await? {
            Some(existing) => Ok(existing),
            None => {
                self.set(shard, start).await?;
                debug!(shard = %shard, start = %start, "offset seeded");
                Ok(start.clone())
            }
        }
    }
}
