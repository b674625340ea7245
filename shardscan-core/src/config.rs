//! Scan tuning knobs shared by the scanner, scheduler and lease.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::offset::OffsetKind;

/// Knobs that tune scanning behaviour.
///
/// All fields carry defaults so a partial configuration payload is enough.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-shard batch sizing and duplicate-key handling.
    pub scanner: ScannerConfig,
    /// Idle wait and lease policy for the coordinating loop.
    pub scheduler: SchedulerConfig,
    /// Scalar type of the scan key, used to decode stored offsets.
    pub offset_kind: OffsetKind,
}

/// How a shard scan treats a run of rows sharing one scan-key value that
/// reaches the end of the over-fetch window.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    /// Fetch the rest of the trailing group with an equality query so a
    /// batch never ends inside a group, however large.
    #[default]
    Complete,
    /// Keep only what the over-fetch window returned. Groups larger than the
    /// margin can be split across batches.
    Margin,
}

/// Per-shard scan sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Nominal rows per batch.
    pub batch_size: usize,
    /// Rows requested per query, as a multiple of `batch_size`.
    pub overfetch_ratio: f64,
    /// Handling of duplicate-key groups cut by the window.
    pub group_policy: GroupPolicy,
}

impl ScannerConfig {
    /// Rows to request for a batch of `limit`: `ceil(limit * ratio)`, never
    /// below `limit`.
    pub fn fetch_limit(&self, limit: usize) -> usize {
        let ratio = if self.overfetch_ratio.is_finite() {
            self.overfetch_ratio.max(1.0)
        } else {
            1.0
        };
        let scaled = (limit as f64 * ratio).ceil() as usize;
        scaled.max(limit).max(1)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: 2_000,
            overfetch_ratio: 1.2,
            group_policy: GroupPolicy::Complete,
        }
    }
}

/// Timing of the coordinating loop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between inspection passes that neither dispatched nor completed
    /// a scan; also the minimum delay before retrying a failed shard (ms).
    pub idle_wait_ms: u64,
    /// Lease timing, used only when a lease is attached to the scheduler.
    pub lease: LeaseConfig,
}

impl SchedulerConfig {
    /// Idle wait as a [`Duration`].
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_wait_ms: 1_000,
            lease: LeaseConfig::default(),
        }
    }
}

/// Lease/renewal tuning for single-writer runs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Lease TTL (ms).
    pub ttl_ms: u64,
    /// Renew once this fraction of the TTL has elapsed since the last renewal.
    pub renew_at_fraction: f32,
}

impl LeaseConfig {
    /// Lease TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Time after which a held lease is renewed.
    pub fn renew_after(&self) -> Duration {
        let fraction = self.renew_at_fraction.clamp(0.05, 0.95);
        self.ttl().mul_f32(fraction)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30_000,
            renew_at_fraction: 0.5,
        }
    }
}
