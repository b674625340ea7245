//! Redis adapters: per-shard offsets in one hash and the scan lease.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use tracing::{debug, info};

use super::OffsetStore;
use crate::{
    error::StoreError,
    lease::{LeaseId, ScanLease},
};

/// Offset store on a single Redis hash: one field per shard.
#[derive(Clone)]
pub struct RedisOffsetStore {
    conn: ConnectionManager,
    hash: String,
}

impl fmt::Debug for RedisOffsetStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisOffsetStore")
            .field("connection", &"ConnectionManager")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Open a managed, auto-reconnecting Redis connection.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    info!("Connecting to Redis at {}", redis_url);
    let client = redis::Client::open(redis_url)?;
    let conn = ConnectionManager::new(client).await?;
    info!("Successfully connected to Redis");
    Ok(conn)
}

impl RedisOffsetStore {
    /// Connect and use `hash` for offsets.
    pub async fn new(redis_url: &str, hash: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self::with_connection(connect(redis_url).await?, hash))
    }

    /// Share an existing connection.
    pub fn with_connection(conn: ConnectionManager, hash: impl Into<String>) -> Self {
        Self {
            conn,
            hash: hash.into(),
        }
    }

    /// Redis hash holding the offsets.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

#[async_trait]
impl OffsetStore for RedisOffsetStore {
    async fn get_field(&self, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(&self.hash, field).await?;
        debug!(hash = %self.hash, field, value = ?value, "offset HGET");
        Ok(value)
    }

    async fn set_field(&self, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(&self.hash, field, value).await?;
        debug!(hash = %self.hash, field, value, "offset HSET");
        Ok(())
    }
}

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Single-writer lease stored as a Redis key holding the owner's id.
#[derive(Clone)]
pub struct RedisScanLease {
    conn: ConnectionManager,
    key: String,
    owner: LeaseId,
    ttl: Duration,
}

impl fmt::Debug for RedisScanLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisScanLease")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisScanLease {
    /// Lease on `key` with a fresh owner id.
    pub fn new(conn: ConnectionManager, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            conn,
            key: key.into(),
            owner: LeaseId::new(),
            ttl,
        }
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

#[async_trait]
impl ScanLease for RedisScanLease {
    fn key(&self) -> &str {
        &self.key
    }

    fn owner(&self) -> LeaseId {
        self.owner
    }

    async fn acquire(&self) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(self.owner.to_string())
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms())
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew(&self) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let renewed: i64 = Script::new(RENEW_SCRIPT)
            .key(&self.key)
            .arg(self.owner.to_string())
            .arg(self.ttl_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(self.owner.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
