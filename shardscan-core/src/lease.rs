//! Optional single-writer lease over an offset store.
//!
//! Without a lease, several schedulers sharing one offset store race with
//! last-writer-wins semantics. A run holding the lease is the only writer
//! for as long as it keeps renewing it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::LeaseConfig,
    error::{ScanError, StoreError},
};

/// Identity of one lease owner.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    /// Fresh, time-ordered owner id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A time-bounded exclusive claim.
#[async_trait]
pub trait ScanLease: Send + Sync + fmt::Debug {
    /// Key the lease is stored under.
    fn key(&self) -> &str;

    /// This holder's identity.
    fn owner(&self) -> LeaseId;

    /// Claim the lease if nobody holds it. `false` when another owner does.
    async fn acquire(&self) -> Result<bool, StoreError>;

    /// Extend the TTL. `false` when the lease expired or changed hands.
    async fn renew(&self) -> Result<bool, StoreError>;

    /// Give the lease up if still held by this owner.
    async fn release(&self) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct Holder {
    owner: LeaseId,
    expires_at: Instant,
}

/// Lease held in process memory. Contenders created with
/// [`MemoryScanLease::contender`] share the same slot.
#[derive(Debug, Clone)]
pub struct MemoryScanLease {
    key: String,
    owner: LeaseId,
    ttl: Duration,
    slot: Arc<Mutex<Option<Holder>>>,
}

impl MemoryScanLease {
    /// Lease on `key` expiring `ttl` after each acquire or renew.
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            owner: LeaseId::new(),
            ttl,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Another owner competing for the same lease.
    pub fn contender(&self) -> Self {
        Self {
            key: self.key.clone(),
            owner: LeaseId::new(),
            ttl: self.ttl,
            slot: Arc::clone(&self.slot),
        }
    }

    /// Whether this owner currently holds an unexpired lease.
    pub fn is_held_by_me(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .is_some_and(|holder| holder.owner == self.owner && holder.expires_at > Instant::now())
    }
}

#[async_trait]
impl ScanLease for MemoryScanLease {
    fn key(&self) -> &str {
        &self.key
    }

    fn owner(&self) -> LeaseId {
        self.owner
    }

    async fn acquire(&self) -> Result<bool, StoreError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match slot.as_ref() {
            Some(holder) if holder.expires_at > now && holder.owner != self.owner => Ok(false),
            _ => {
                *slot = Some(Holder {
                    owner: self.owner,
                    expires_at: now + self.ttl,
                });
                Ok(true)
            }
        }
    }

    async fn renew(&self) -> Result<bool, StoreError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match slot.as_mut() {
            Some(holder) if holder.owner == self.owner && holder.expires_at > now => {
                holder.expires_at = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|holder| holder.owner == self.owner) {
            *slot = None;
        }
        Ok(())
    }
}

/// Renewal bookkeeping for a lease held by a running scan.
#[derive(Debug)]
pub(crate) struct LeaseKeeper {
    lease: Arc<dyn ScanLease>,
    config: LeaseConfig,
    renewed_at: Instant,
}

impl LeaseKeeper {
    pub(crate) async fn acquire(
        lease: Arc<dyn ScanLease>,
        config: LeaseConfig,
    ) -> Result<Self, ScanError> {
        let acquired = lease.acquire().await.map_err(ScanError::LeaseStore)?;
        if !acquired {
            return Err(ScanError::LeaseUnavailable {
                key: lease.key().to_string(),
            });
        }
        debug!(key = lease.key(), owner = %lease.owner(), "scan lease acquired");
        Ok(Self {
            lease,
            config,
            renewed_at: Instant::now(),
        })
    }

    /// Renew when due. Transient store errors are tolerated until the TTL
    /// since the last successful renewal has run out.
    pub(crate) async fn maintain(&mut self) -> Result<(), ScanError> {
        if self.renewed_at.elapsed() < self.config.renew_after() {
            return Ok(());
        }
        match self.lease.renew().await {
            Ok(true) => {
                self.renewed_at = Instant::now();
                Ok(())
            }
            Ok(false) => Err(self.lost()),
            Err(err) if self.renewed_at.elapsed() >= self.config.ttl() => {
                warn!(key = self.lease.key(), error = %err, "scan lease renewal failed past its ttl");
                Err(self.lost())
            }
            Err(err) => {
                warn!(key = self.lease.key(), error = %err, "scan lease renewal failed, retrying");
                Ok(())
            }
        }
    }

    pub(crate) async fn release(self) {
        if let Err(err) = self.lease.release().await {
            warn!(key = self.lease.key(), error = %err, "failed to release scan lease");
        }
    }

    fn lost(&self) -> ScanError {
        ScanError::LeaseLost {
            key: self.lease.key().to_string(),
        }
    }
}
