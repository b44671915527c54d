// Exclusive edit leases per document key.
//
// At most one non-expired lease exists per key. Expiry is lazy: an expired
// lease stays in the table until the next acquire/heartbeat/release touching
// its key supersedes or removes it, or until the optional sweep evicts it.
// When an expired lease is superseded by another identity the table
// remembers the previous holder so that holder's next heartbeat reports
// `LockLost` instead of a plain conflict.

mod memory;
mod postgres;
pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use inkwell_common::protocol::http::{LeaseGrant, LockView};
use inkwell_common::types::DocumentKey;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::memory::MemoryLeaseTable;
use self::postgres::PostgresLeaseTable;

/// Default lease duration.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(90);

/// Default interval between session heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A granted edit lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: DocumentKey,
    pub holder: String,
    /// Changes whenever the lease is granted anew (first acquire, takeover,
    /// re-acquire after expiry); stable across renewals.
    pub lease_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn view(&self) -> LockView {
        LockView {
            holder: self.holder.clone(),
            acquired_at: self.acquired_at,
            expires_at: self.expires_at,
            last_heartbeat_at: self.last_heartbeat_at,
        }
    }
}

/// Successful acquire or heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granted {
    pub lease: Lease,
    pub grant: LeaseGrant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Nothing held by the caller; any other holder is left untouched.
    NotHeld,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("document is locked by {holder}")]
    Conflict { holder: String },

    #[error("lease expired and was taken over by {holder}")]
    LockLost { holder: String },

    #[error("no lease is held on this document")]
    NotFound,

    #[error("lease ttl must be greater than zero")]
    InvalidTtl,

    #[error("lock backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl LockError {
    /// Errors that mean the caller no longer holds the lease.
    pub fn is_lease_loss(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::LockLost { .. } | Self::NotFound)
    }
}

/// Lease table shared by every session and request handler.
#[derive(Clone)]
pub struct LockManager {
    backend: LockBackend,
    ttl: Duration,
}

#[derive(Clone)]
enum LockBackend {
    Postgres(PostgresLeaseTable),
    Memory(Arc<Mutex<MemoryLeaseTable>>),
}

impl LockManager {
    pub fn memory(ttl: Duration) -> Self {
        Self { backend: LockBackend::Memory(Arc::new(Mutex::new(MemoryLeaseTable::default()))), ttl }
    }

    pub fn postgres(pool: PgPool, ttl: Duration) -> Self {
        Self { backend: LockBackend::Postgres(PostgresLeaseTable::new(pool)), ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquire (or idempotently refresh) the lease on `key` for `holder`.
    pub async fn acquire(&self, key: &DocumentKey, holder: &str) -> Result<Granted, LockError> {
        self.acquire_at(key, holder, self.ttl, Utc::now()).await
    }

    pub async fn acquire_at(
        &self,
        key: &DocumentKey,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Granted, LockError> {
        let expires_at = expires_at_with_ttl(now, ttl)?;
        let result = match &self.backend {
            LockBackend::Postgres(table) => table.acquire(key, holder, now, expires_at).await,
            LockBackend::Memory(table) => table.lock().await.acquire(key, holder, now, expires_at),
        };

        match &result {
            Ok(granted) => log_grant(key, &granted.grant, holder),
            Err(LockError::Conflict { holder: current }) => {
                debug!(%key, identity = holder, holder = %current, "lease acquire denied");
            }
            Err(_) => {}
        }
        result
    }

    /// Renew the caller's lease. An expired lease still held by the caller is
    /// re-acquired.
    pub async fn heartbeat(&self, key: &DocumentKey, holder: &str) -> Result<Granted, LockError> {
        self.heartbeat_at(key, holder, self.ttl, Utc::now()).await
    }

    pub async fn heartbeat_at(
        &self,
        key: &DocumentKey,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Granted, LockError> {
        let expires_at = expires_at_with_ttl(now, ttl)?;
        let result = match &self.backend {
            LockBackend::Postgres(table) => table.heartbeat(key, holder, now, expires_at).await,
            LockBackend::Memory(table) => table.lock().await.heartbeat(key, holder, now, expires_at),
        };

        match &result {
            Ok(granted) if granted.grant == LeaseGrant::Renewed => {
                debug!(%key, holder, expires_at = %granted.lease.expires_at, "lease renewed");
            }
            Ok(granted) => log_grant(key, &granted.grant, holder),
            Err(LockError::LockLost { holder: current }) => {
                warn!(%key, identity = holder, holder = %current, "lease lost to takeover");
            }
            Err(_) => {}
        }
        result
    }

    /// Release the caller's lease. Never disturbs another holder.
    pub async fn release(
        &self,
        key: &DocumentKey,
        holder: &str,
    ) -> Result<ReleaseOutcome, LockError> {
        let outcome = match &self.backend {
            LockBackend::Postgres(table) => table.release(key, holder).await?,
            LockBackend::Memory(table) => table.lock().await.release(key, holder),
        };

        if outcome == ReleaseOutcome::Released {
            info!(%key, holder, "lease released");
        }
        Ok(outcome)
    }

    /// Current non-expired lease on `key`, if any.
    pub async fn status(&self, key: &DocumentKey) -> Result<Option<Lease>, LockError> {
        self.status_at(key, Utc::now()).await
    }

    pub async fn status_at(
        &self,
        key: &DocumentKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, LockError> {
        match &self.backend {
            LockBackend::Postgres(table) => table.status(key, now).await,
            LockBackend::Memory(table) => Ok(table.lock().await.status(key, now)),
        }
    }

    /// Delete expired leases. Returns the number of evicted leases.
    pub async fn evict_expired(&self) -> Result<usize, LockError> {
        self.evict_expired_at(Utc::now()).await
    }

    pub async fn evict_expired_at(&self, now: DateTime<Utc>) -> Result<usize, LockError> {
        match &self.backend {
            LockBackend::Postgres(table) => table.evict_expired(now).await,
            LockBackend::Memory(table) => Ok(table.lock().await.evict_expired(now)),
        }
    }
}

fn expires_at_with_ttl(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, LockError> {
    if ttl.is_zero() {
        return Err(LockError::InvalidTtl);
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or(LockError::InvalidTtl)
}

fn log_grant(key: &DocumentKey, grant: &LeaseGrant, holder: &str) {
    match grant {
        LeaseGrant::Acquired => info!(%key, holder, "lease acquired"),
        LeaseGrant::Renewed => debug!(%key, holder, "lease refreshed by re-acquire"),
        LeaseGrant::TakenOver => info!(%key, holder, "expired lease taken over"),
    }
}
