// Lease endpoints.
//
// Routes:
//   GET    /v1/buckets/{bucket}/locks/{*path}   current holder
//   POST   /v1/buckets/{bucket}/locks/{*path}   acquire
//   PUT    /v1/buckets/{bucket}/locks/{*path}   heartbeat
//   DELETE /v1/buckets/{bucket}/locks/{*path}   release

use axum::{
    extract::{Extension, Json, Path, State},
    routing::get,
    Router,
};
use inkwell_common::protocol::http::{LockGrantEnvelope, LockStatusEnvelope, ReleaseEnvelope};

use super::{document_key, AppState};
use crate::{
    auth::{Identity, Permission},
    error::ApiError,
    lock::{Granted, ReleaseOutcome},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new().route(
        "/v1/buckets/{bucket}/locks/{*path}",
        get(lock_status).post(acquire_lock).put(heartbeat_lock).delete(release_lock),
    )
}

async fn lock_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<LockStatusEnvelope>, ApiError> {
    identity.require(Permission::Read)?;
    let key = document_key(&bucket, &path)?;

    let lease = state.locks.status(&key).await?;
    Ok(Json(LockStatusEnvelope { locked: lease.is_some(), lock: lease.map(|lease| lease.view()) }))
}

async fn acquire_lock(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<LockGrantEnvelope>, ApiError> {
    identity.require(Permission::Write)?;
    let key = document_key(&bucket, &path)?;

    let granted = state.locks.acquire(&key, &identity.id).await?;
    Ok(Json(grant_envelope(granted)))
}

async fn heartbeat_lock(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<LockGrantEnvelope>, ApiError> {
    identity.require(Permission::Write)?;
    let key = document_key(&bucket, &path)?;

    let granted = state.locks.heartbeat(&key, &identity.id).await?;
    Ok(Json(grant_envelope(granted)))
}

async fn release_lock(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<ReleaseEnvelope>, ApiError> {
    identity.require(Permission::Write)?;
    let key = document_key(&bucket, &path)?;

    let outcome = state.locks.release(&key, &identity.id).await?;
    Ok(Json(ReleaseEnvelope { released: outcome == ReleaseOutcome::Released }))
}

fn grant_envelope(granted: Granted) -> LockGrantEnvelope {
    LockGrantEnvelope { lock: granted.lease.view(), grant: granted.grant }
}
