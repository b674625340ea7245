//! # shardscan core
//!
//! Resumable, concurrent scanning of horizontally-partitioned tables.
//!
//! A logical table is split into shards (one physical table each). The
//! [`scheduler::ScanScheduler`] walks every shard in parallel with a
//! monotonically increasing scan key, persists each shard's progress through
//! an [`offsets::OffsetTracker`], and merges the per-shard batches into one
//! stream. A restarted process picks up exactly where the durable offsets
//! say the previous one stopped.
//!
//! ## Architecture
//!
//! - [`scanner`]: one shard, one batch: `(next_offset, records)` from an offset.
//! - [`offsets`]: durable per-shard offsets on top of an [`store::OffsetStore`].
//! - [`scheduler`]: oldest-offset-first dispatch onto a bounded worker pool.
//! - [`layout`]: how keys map to shards and how shard tables are named.
//! - [`table`]: point lookups and writes routed by the sharding key.
//! - [`lease`]: optional single-writer claim on an offset store.
//! - [`store`]: collaborator ports plus Postgres, Redis and in-memory adapters.
//!
//! ## Feature Flags
//!
//! - `database` (default): Postgres row store, Redis offset store and lease.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use shardscan_core::{
//!     config::ScanConfig,
//!     layout::ModuloLayout,
//!     offsets::OffsetTracker,
//!     record::RowDecoder,
//!     scheduler::{ScanRequest, WaitMode},
//!     store::{MemoryOffsetStore, MemoryRowStore},
//!     table::ShardedTable,
//!     Offset,
//! };
//!
//! async fn drain() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::default();
//!     let table = ShardedTable::new(
//!         Arc::new(ModuloLayout::new("orders", 4)),
//!         Arc::new(MemoryRowStore::new()),
//!         RowDecoder,
//!         "id",
//!         config.scanner.clone(),
//!     )?;
//!     let tracker = OffsetTracker::new(Arc::new(MemoryOffsetStore::new()), config.offset_kind);
//!     let scheduler = table.scheduler(tracker, config.scheduler)?;
//!
//!     let request = ScanRequest::new(Offset::Int(0), "id")
//!         .workers(2)
//!         .wait_mode(WaitMode::OneShot);
//!     let mut batches = scheduler.run(request).await?;
//!     while let Some(batch) = batches.next().await {
//!         let batch = batch?;
//!         println!("shard {} -> {} records", batch.shard, batch.len());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;
pub mod layout;
pub mod lease;
pub mod offset;
pub mod offsets;
pub mod record;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod table;

pub use error::{Result, ScanError, StoreError};
pub use offset::{Offset, OffsetKind, ShardId};
pub use record::{Row, RecordDecoder};
pub use scheduler::{Batch, ScanRequest, ScanScheduler, ScanStream, WaitMode};
