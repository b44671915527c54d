// Process-local lease table. Callers serialize access through the
// `tokio::sync::Mutex` in `LockManager`, which makes every operation on a
// key atomic with respect to the others.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use inkwell_common::protocol::http::LeaseGrant;
use inkwell_common::types::DocumentKey;
use uuid::Uuid;

use super::{Granted, Lease, LockError, ReleaseOutcome};

#[derive(Debug, Clone)]
struct LeaseRecord {
    lease: Lease,
    /// Holder whose expired lease this one superseded.
    previous_holder: Option<String>,
}

#[derive(Debug, Default)]
pub(super) struct MemoryLeaseTable {
    leases: HashMap<DocumentKey, LeaseRecord>,
}

impl MemoryLeaseTable {
    pub(super) fn acquire(
        &mut self,
        key: &DocumentKey,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Granted, LockError> {
        let Some(record) = self.leases.get_mut(key) else {
            let lease = new_lease(key, holder, now, expires_at);
            self.leases
                .insert(key.clone(), LeaseRecord { lease: lease.clone(), previous_holder: None });
            return Ok(Granted { lease, grant: LeaseGrant::Acquired });
        };

        let expired = record.lease.is_expired_at(now);
        if record.lease.holder == holder && !expired {
            record.lease.expires_at = expires_at;
            record.lease.last_heartbeat_at = now;
            return Ok(Granted { lease: record.lease.clone(), grant: LeaseGrant::Renewed });
        }
        if !expired {
            return Err(LockError::Conflict { holder: record.lease.holder.clone() });
        }

        let (grant, previous_holder) = if record.lease.holder == holder {
            (LeaseGrant::Acquired, None)
        } else {
            (LeaseGrant::TakenOver, Some(record.lease.holder.clone()))
        };
        *record = LeaseRecord { lease: new_lease(key, holder, now, expires_at), previous_holder };
        Ok(Granted { lease: record.lease.clone(), grant })
    }

    pub(super) fn heartbeat(
        &mut self,
        key: &DocumentKey,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Granted, LockError> {
        let record = self.leases.get_mut(key).ok_or(LockError::NotFound)?;
        let expired = record.lease.is_expired_at(now);

        if record.lease.holder == holder {
            if expired {
                *record = LeaseRecord {
                    lease: new_lease(key, holder, now, expires_at),
                    previous_holder: None,
                };
                return Ok(Granted { lease: record.lease.clone(), grant: LeaseGrant::Acquired });
            }
            record.lease.expires_at = expires_at;
            record.lease.last_heartbeat_at = now;
            return Ok(Granted { lease: record.lease.clone(), grant: LeaseGrant::Renewed });
        }

        if expired {
            return Err(LockError::NotFound);
        }
        let current = record.lease.holder.clone();
        if record.previous_holder.as_deref() == Some(holder) {
            Err(LockError::LockLost { holder: current })
        } else {
            Err(LockError::Conflict { holder: current })
        }
    }

    pub(super) fn release(&mut self, key: &DocumentKey, holder: &str) -> ReleaseOutcome {
        match self.leases.get(key) {
            Some(record) if record.lease.holder == holder => {
                self.leases.remove(key);
                ReleaseOutcome::Released
            }
            _ => ReleaseOutcome::NotHeld,
        }
    }

    pub(super) fn status(&self, key: &DocumentKey, now: DateTime<Utc>) -> Option<Lease> {
        self.leases
            .get(key)
            .filter(|record| !record.lease.is_expired_at(now))
            .map(|record| record.lease.clone())
    }

    pub(super) fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.leases.len();
        self.leases.retain(|_, record| !record.lease.is_expired_at(now));
        before - self.leases.len()
    }
}

fn new_lease(
    key: &DocumentKey,
    holder: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Lease {
    Lease {
        key: key.clone(),
        holder: holder.to_string(),
        lease_id: Uuid::new_v4(),
        acquired_at: now,
        expires_at,
        last_heartbeat_at: now,
    }
}
