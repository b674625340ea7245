//! Configuration sections.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardscan_core::{
    Offset, OffsetKind, WaitMode,
    config::ScanConfig,
    layout::{ModuloLayout, RangeLayout, ShardLayout},
};

use crate::loader::error::ConfigError;

/// Everything a shardscan run needs. Every section is optional in a config
/// file; missing values fall back to their defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ShardscanConfig {
    /// Batch sizing, duplicate-key policy, idle wait, lease timing and the
    /// scan-key type.
    pub scan: ScanConfig,
    /// Postgres connection.
    pub database: DatabaseConfig,
    /// Offset store and lease.
    pub redis: RedisConfig,
    /// Sharded table layout and keys.
    pub table: TableConfig,
    /// Defaults for `shardscanctl scan`.
    pub run: RunConfig,
}

/// Postgres pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. `DATABASE_URL` overrides it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Pool size.
    pub max_connections: u32,
    /// Wait for a pooled connection (ms).
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Acquire timeout as a [`Duration`].
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Redis offset store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL. `REDIS_URL` overrides it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Hash holding one field per shard offset.
    pub offsets_key: String,
    /// Key of the single-writer lease. No lease is taken when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_key: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            offsets_key: "shardscan:offsets".to_string(),
            lease_key: None,
        }
    }
}

/// How sharding-key values map to shard tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutConfig {
    /// `key mod shard_count`.
    #[default]
    Modulo,
    /// Shard `i` holds keys below `upper_bounds[i]`; `shard_count` is
    /// `upper_bounds.len() + 1`.
    Range {
        /// Exclusive upper bound of each shard but the last.
        upper_bounds: Vec<i64>,
    },
}

/// The logical table being scanned.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TableConfig {
    /// Shard tables are named `{base}_{index}`, index zero-padded to `width`.
    pub base: String,
    /// Shard tables for the modulo layout.
    pub shard_count: usize,
    /// Digits in the shard table suffix.
    pub width: usize,
    /// Monotonic column scanned in order.
    pub scan_key: String,
    /// Column routing lookups and writes.
    pub sharding_key: String,
    /// Key-to-shard mapping.
    pub layout: LayoutConfig,
}

impl TableConfig {
    /// Layout built from this section.
    pub fn layout(&self) -> Arc<dyn ShardLayout> {
        match &self.layout {
            LayoutConfig::Modulo => {
                Arc::new(ModuloLayout::new(self.base.clone(), self.shard_count).with_width(self.width))
            }
            LayoutConfig::Range { upper_bounds } => {
                Arc::new(RangeLayout::new(self.base.clone(), upper_bounds.clone()).with_width(self.width))
            }
        }
    }

    /// Shards the layout produces.
    pub fn resolved_shard_count(&self) -> usize {
        match &self.layout {
            LayoutConfig::Modulo => self.shard_count,
            LayoutConfig::Range { .. } => self.layout().tables().len(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            base: "records".to_string(),
            shard_count: 1,
            width: 3,
            scan_key: "id".to_string(),
            sharding_key: "id".to_string(),
            layout: LayoutConfig::Modulo,
        }
    }
}

/// Run parameters the CLI can override.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// Concurrent shard scans.
    pub worker_count: usize,
    /// Scan only the first N shards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_limit: Option<usize>,
    /// Offset written for shards with no stored offset, in the stored string
    /// form. Defaults to the origin of the configured offset kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_start: Option<String>,
    /// Keep tailing once every shard is exhausted.
    pub follow: bool,
    /// Re-poll delay for exhausted shards while following (ms).
    pub poll_interval_ms: u64,
}

impl RunConfig {
    /// Seed offset parsed as `kind`.
    pub fn seed(&self, kind: OffsetKind) -> Result<Offset, ConfigError> {
        match self.seed_start.as_deref() {
            None => Ok(kind.origin()),
            Some(raw) => kind.parse(raw).ok_or_else(|| ConfigError::Invalid {
                field: "run.seed_start",
                reason: format!("{raw:?} is not a {kind} offset"),
            }),
        }
    }

    /// Continuous when following, one-shot otherwise.
    pub fn wait_mode(&self) -> WaitMode {
        if self.follow {
            WaitMode::Continuous {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
            }
        } else {
            WaitMode::OneShot
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            shard_limit: None,
            seed_start: None,
            follow: false,
            poll_interval_ms: 1_000,
        }
    }
}
