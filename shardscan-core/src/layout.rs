//! Sharding strategies: which physical table holds a key, and which tables
//! make up the logical one.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Maps sharding-key values to shard indices and names the shard tables.
///
/// `shard_of` must return an index below `tables().len()`.
pub trait ShardLayout: Send + Sync + fmt::Debug {
    /// Physical table names, index `i` being shard `i`.
    fn tables(&self) -> Vec<String>;

    /// Shard holding `value`, or `None` when the value cannot be routed.
    fn shard_of(&self, value: &Value) -> Option<usize>;
}

fn shard_table(base: &str, index: usize, width: usize) -> String {
    format!("{base}_{index:0width$}")
}

/// Stable across processes and releases, unlike `DefaultHasher`.
fn stable_hash(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// `base_000 .. base_{n-1}`; integers route by `key mod n`, strings by a
/// stable hash (numeric strings route like the integer they spell).
#[derive(Clone, Debug)]
pub struct ModuloLayout {
    base: String,
    count: usize,
    width: usize,
}

impl ModuloLayout {
    /// `count` tables named `{base}_000`, `{base}_001`, ...
    pub fn new(base: impl Into<String>, count: usize) -> Self {
        Self {
            base: base.into(),
            count,
            width: 3,
        }
    }

    /// Zero-padding width of the table suffix.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    fn route_int(&self, value: i64) -> usize {
        value.rem_euclid(self.count as i64) as usize
    }
}

impl ShardLayout for ModuloLayout {
    fn tables(&self) -> Vec<String> {
        (0..self.count)
            .map(|index| shard_table(&self.base, index, self.width))
            .collect()
    }

    fn shard_of(&self, value: &Value) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        match value {
            Value::Number(number) => match (number.as_i64(), number.as_u64()) {
                (Some(int), _) => Some(self.route_int(int)),
                (None, Some(uint)) => Some((uint % self.count as u64) as usize),
                _ => None,
            },
            Value::String(text) => match text.trim().parse::<i64>() {
                Ok(int) => Some(self.route_int(int)),
                Err(_) => Some((stable_hash(text) % self.count as u64) as usize),
            },
            _ => None,
        }
    }
}

/// Integer key ranges: shard `i` holds keys below `upper_bounds[i]` and at
/// or above the previous bound; the last shard holds everything above the
/// final bound.
#[derive(Clone)]
pub struct RangeLayout {
    base: String,
    upper_bounds: Vec<i64>,
    width: usize,
}

impl RangeLayout {
    /// One table per bound plus one for keys above the last bound. Bounds are
    /// sorted and deduplicated.
    pub fn new(base: impl Into<String>, mut upper_bounds: Vec<i64>) -> Self {
        upper_bounds.sort_unstable();
        upper_bounds.dedup();
        Self {
            base: base.into(),
            upper_bounds,
            width: 3,
        }
    }

    /// Zero-pad table indices to `width` digits.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }
}

impl fmt::Debug for RangeLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeLayout")
            .field("base", &self.base)
            .field("shard_count", &(self.upper_bounds.len() + 1))
            .finish()
    }
}

impl ShardLayout for RangeLayout {
    fn tables(&self) -> Vec<String> {
        (0..=self.upper_bounds.len())
            .map(|index| shard_table(&self.base, index, self.width))
            .collect()
    }

    fn shard_of(&self, value: &Value) -> Option<usize> {
        let key = match value {
            Value::Number(number) => number.as_i64()?,
            Value::String(text) => text.trim().parse().ok()?,
            _ => return None,
        };
        Some(self.upper_bounds.partition_point(|bound| *bound <= key))
    }
}
