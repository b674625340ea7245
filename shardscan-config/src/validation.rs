//! Checks run on every loaded configuration.

use shardscan_core::store::{validate_column_name, validate_table_name};
use url::Url;

use crate::{ShardscanConfig, loader::error::ConfigError, models::LayoutConfig};

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_url(field: &'static str, url: Option<&str>) -> Result<(), ConfigError> {
    match url {
        Some(raw) => Url::parse(raw)
            .map(|_| ())
            .map_err(|source| ConfigError::InvalidUrl { field, source }),
        None => Ok(()),
    }
}

/// Reject configurations a run cannot start with.
pub fn validate(config: &ShardscanConfig) -> Result<(), ConfigError> {
    let table = &config.table;
    validate_table_name(&table.base).map_err(|_| invalid("table.base", format!("{:?} is not a table name", table.base)))?;
    validate_column_name(&table.scan_key)
        .map_err(|_| invalid("table.scan_key", format!("{:?} is not a column name", table.scan_key)))?;
    validate_column_name(&table.sharding_key)
        .map_err(|_| invalid("table.sharding_key", format!("{:?} is not a column name", table.sharding_key)))?;

    match &table.layout {
        LayoutConfig::Modulo if table.shard_count == 0 => {
            return Err(invalid("table.shard_count", "must be positive"));
        }
        LayoutConfig::Range { upper_bounds } if upper_bounds.is_empty() => {
            return Err(invalid("table.layout.upper_bounds", "needs at least one bound"));
        }
        _ => {}
    }
    if table.width == 0 {
        return Err(invalid("table.width", "must be positive"));
    }

    let scanner = &config.scan.scanner;
    if scanner.batch_size == 0 {
        return Err(invalid("scan.scanner.batch_size", "must be positive"));
    }
    if scanner.overfetch_ratio.is_nan() || scanner.overfetch_ratio < 1.0 {
        return Err(invalid(
            "scan.scanner.overfetch_ratio",
            format!("{} is below 1.0", scanner.overfetch_ratio),
        ));
    }

    let run = &config.run;
    if run.worker_count == 0 {
        return Err(invalid("run.worker_count", "must be positive"));
    }
    if let Some(limit) = run.shard_limit {
        let shards = table.resolved_shard_count();
        if limit == 0 || limit > shards {
            return Err(invalid("run.shard_limit", format!("{limit} outside 1..={shards}")));
        }
    }
    run.seed(config.scan.offset_kind)?;

    if config.redis.offsets_key.trim().is_empty() {
        return Err(invalid("redis.offsets_key", "must not be empty"));
    }
    check_url("database.url", config.database.url.as_deref())?;
    check_url("redis.url", config.redis.url.as_deref())?;
    Ok(())
}
