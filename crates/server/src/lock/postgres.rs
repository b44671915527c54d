// Postgres lease table.
//
// Leases live in `document_leases` so they survive restarts and coordinate
// across server replicas. Acquire is one conditional upsert; heartbeat is a
// holder-scoped update followed by a read to classify the failure.

use chrono::{DateTime, Utc};
use inkwell_common::protocol::http::LeaseGrant;
use inkwell_common::types::DocumentKey;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::{Granted, Lease, LockError, ReleaseOutcome};

#[derive(sqlx::FromRow)]
struct LeaseRow {
    holder: String,
    lease_id: Uuid,
    previous_holder: Option<String>,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
}

impl LeaseRow {
    fn into_lease(self, key: &DocumentKey) -> Lease {
        Lease {
            key: key.clone(),
            holder: self.holder,
            lease_id: self.lease_id,
            acquired_at: self.acquired_at,
            expires_at: self.expires_at,
            last_heartbeat_at: self.last_heartbeat_at,
        }
    }
}

#[derive(Clone)]
pub(super) struct PostgresLeaseTable {
    pool: PgPool,
}

impl PostgresLeaseTable {
    pub(super) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(super) async fn acquire(
        &self,
        key: &DocumentKey,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Granted, LockError> {
        let proposed_lease_id = Uuid::new_v4();

        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
INSERT INTO document_leases
    (bucket, path, holder, lease_id, previous_holder, acquired_at, expires_at, last_heartbeat_at)
VALUES ($1, $2, $3, $4, NULL, $5, $6, $5)
ON CONFLICT (bucket, path) DO UPDATE
SET previous_holder = CASE
        WHEN document_leases.expires_at <= $5 AND document_leases.holder <> EXCLUDED.holder
            THEN document_leases.holder
        WHEN document_leases.expires_at <= $5 THEN NULL
        ELSE document_leases.previous_holder
    END,
    holder = CASE
        WHEN document_leases.expires_at <= $5 THEN EXCLUDED.holder
        ELSE document_leases.holder
    END,
    lease_id = CASE
        WHEN document_leases.expires_at <= $5 THEN EXCLUDED.lease_id
        ELSE document_leases.lease_id
    END,
    acquired_at = CASE
        WHEN document_leases.expires_at <= $5 THEN EXCLUDED.acquired_at
        ELSE document_leases.acquired_at
    END,
    expires_at = CASE
        WHEN document_leases.expires_at <= $5
            OR document_leases.holder = EXCLUDED.holder
            THEN EXCLUDED.expires_at
        ELSE document_leases.expires_at
    END,
    last_heartbeat_at = CASE
        WHEN document_leases.expires_at <= $5
            OR document_leases.holder = EXCLUDED.holder
            THEN EXCLUDED.last_heartbeat_at
        ELSE document_leases.last_heartbeat_at
    END
RETURNING holder, lease_id, previous_holder, acquired_at, expires_at, last_heartbeat_at
            "#,
        )
        .bind(key.bucket())
        .bind(key.path())
        .bind(holder)
        .bind(proposed_lease_id)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if row.holder != holder {
            return Err(LockError::Conflict { holder: row.holder });
        }

        let grant = if row.lease_id != proposed_lease_id {
            LeaseGrant::Renewed
        } else if row.previous_holder.is_some() {
            LeaseGrant::TakenOver
        } else {
            LeaseGrant::Acquired
        };
        Ok(Granted { lease: row.into_lease(key), grant })
    }

    pub(super) async fn heartbeat(
        &self,
        key: &DocumentKey,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Granted, LockError> {
        let proposed_lease_id = Uuid::new_v4();

        let renewed = sqlx::query_as::<_, LeaseRow>(
            r#"
UPDATE document_leases
SET previous_holder = CASE WHEN expires_at <= $4 THEN NULL ELSE previous_holder END,
    lease_id = CASE WHEN expires_at <= $4 THEN $5 ELSE lease_id END,
    acquired_at = CASE WHEN expires_at <= $4 THEN $4 ELSE acquired_at END,
    expires_at = $6,
    last_heartbeat_at = $4
WHERE bucket = $1
  AND path = $2
  AND holder = $3
RETURNING holder, lease_id, previous_holder, acquired_at, expires_at, last_heartbeat_at
            "#,
        )
        .bind(key.bucket())
        .bind(key.path())
        .bind(holder)
        .bind(now)
        .bind(proposed_lease_id)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = renewed {
            let grant = if row.lease_id == proposed_lease_id {
                LeaseGrant::Acquired
            } else {
                LeaseGrant::Renewed
            };
            return Ok(Granted { lease: row.into_lease(key), grant });
        }

        let active = sqlx::query_as::<_, (String, Option<String>)>(
            r#"
SELECT holder, previous_holder
FROM document_leases
WHERE bucket = $1
  AND path = $2
  AND expires_at > $3
            "#,
        )
        .bind(key.bucket())
        .bind(key.path())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match active {
            None => Err(LockError::NotFound),
            Some((current, previous)) if previous.as_deref() == Some(holder) => {
                Err(LockError::LockLost { holder: current })
            }
            Some((current, _)) => Err(LockError::Conflict { holder: current }),
        }
    }

    pub(super) async fn release(
        &self,
        key: &DocumentKey,
        holder: &str,
    ) -> Result<ReleaseOutcome, LockError> {
        let deleted = sqlx::query(
            r#"
DELETE FROM document_leases
WHERE bucket = $1
  AND path = $2
  AND holder = $3
            "#,
        )
        .bind(key.bucket())
        .bind(key.path())
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        Ok(if deleted == 1 { ReleaseOutcome::Released } else { ReleaseOutcome::NotHeld })
    }

    pub(super) async fn status(
        &self,
        key: &DocumentKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, LockError> {
        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
SELECT holder, lease_id, previous_holder, acquired_at, expires_at, last_heartbeat_at
FROM document_leases
WHERE bucket = $1
  AND path = $2
  AND expires_at > $3
            "#,
        )
        .bind(key.bucket())
        .bind(key.path())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| row.into_lease(key)))
    }

    pub(super) async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, LockError> {
        let deleted = sqlx::query(
            r#"
DELETE FROM document_leases
WHERE expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        Ok(deleted as usize)
    }
}

fn map_sqlx_error(error: sqlx::Error) -> LockError {
    error!(error = %error, "lease table query failed");
    LockError::BackendUnavailable(error.to_string())
}
