//! Builds the stores and scan objects a command needs from the configuration.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use shardscan_config::ShardscanConfig;
use shardscan_core::{
    offsets::OffsetTracker,
    record::RowDecoder,
    scheduler::ScanScheduler,
    store::{PostgresRowStore, RedisOffsetStore, RedisScanLease, redis::connect},
    table::ShardedTable,
};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

pub(crate) struct Redis {
    pub(crate) offsets: Arc<RedisOffsetStore>,
    pub(crate) lease: Option<Arc<RedisScanLease>>,
}

pub(crate) async fn redis(config: &ShardscanConfig) -> Result<Redis> {
    let url = config
        .redis
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("redis.url (or REDIS_URL) is required"))?;
    let conn = connect(url).await.context("failed to connect to Redis")?;

    let offsets = Arc::new(RedisOffsetStore::with_connection(
        conn.clone(),
        config.redis.offsets_key.clone(),
    ));
    let lease = config.redis.lease_key.as_ref().map(|key| {
        Arc::new(RedisScanLease::new(
            conn.clone(),
            key.clone(),
            config.scan.scheduler.lease.ttl(),
        ))
    });
    Ok(Redis { offsets, lease })
}

pub(crate) fn tracker(config: &ShardscanConfig, redis: &Redis) -> OffsetTracker {
    OffsetTracker::new(redis.offsets.clone(), config.scan.offset_kind)
}

pub(crate) async fn scheduler(config: &ShardscanConfig) -> Result<ScanScheduler<RowDecoder>> {
    let url = config
        .database
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("database.url (or DATABASE_URL) is required"))?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    info!(max_connections = config.database.max_connections, "connected to Postgres");

    let table = ShardedTable::new(
        config.table.layout(),
        Arc::new(PostgresRowStore::new(pool)),
        RowDecoder,
        config.table.sharding_key.clone(),
        config.scan.scanner.clone(),
    )?;

    let redis = redis(config).await?;
    let mut scheduler = table.scheduler(tracker(config, &redis), config.scan.scheduler)?;
    if let Some(lease) = redis.lease {
        scheduler = scheduler.with_lease(lease);
    }
    Ok(scheduler)
}
