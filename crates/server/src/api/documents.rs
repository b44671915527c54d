// Document, history and comparison endpoints.
//
// Routes:
//   GET /v1/buckets                                           buckets holding documents
//   GET /v1/buckets/{bucket}/documents                        list latest documents
//   GET /v1/buckets/{bucket}/documents/{*path}                latest as editable payload
//   PUT /v1/buckets/{bucket}/documents/{*path}                save editable payload
//   GET /v1/buckets/{bucket}/history/{*path}                  list versions
//   GET /v1/buckets/{bucket}/snapshots/{version_id}/{*path}   one version's content
//   GET /v1/buckets/{bucket}/compare/{*path}?from=&to=        two versions side by side

use axum::{
    extract::{Extension, Json, Path, Query, State},
    routing::get,
    Router,
};
use inkwell_common::content::extract;
use inkwell_common::path::normalize_bucket;
use inkwell_common::protocol::http::{
    BucketsEnvelope, ComparisonEnvelope, CompareQuery, DocumentPayload, DocumentsEnvelope,
    ListDocumentsQuery, SaveDocumentRequest, SaveDocumentResponse, VersionContent,
    VersionsEnvelope,
};
use serde_json::json;
use tracing::info;

use super::{document_key, AppState};
use crate::{
    auth::{Identity, Permission},
    error::{ApiError, ErrorCode},
    history,
    lock::LockError,
    store::{DocumentFilter, StoreError},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/buckets", get(list_buckets))
        .route("/v1/buckets/{bucket}/documents", get(list_documents))
        .route("/v1/buckets/{bucket}/documents/{*path}", get(get_document).put(save_document))
        .route("/v1/buckets/{bucket}/history/{*path}", get(list_history))
        .route("/v1/buckets/{bucket}/snapshots/{version_id}/{*path}", get(get_snapshot))
        .route("/v1/buckets/{bucket}/compare/{*path}", get(compare_versions))
}

async fn list_buckets(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<BucketsEnvelope>, ApiError> {
    identity.require(Permission::Read)?;
    Ok(Json(BucketsEnvelope { buckets: state.store.list_buckets().await? }))
}

async fn list_documents(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(bucket): Path<String>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<DocumentsEnvelope>, ApiError> {
    identity.require(Permission::Read)?;
    let bucket = normalize_bucket(&bucket)?;

    let documents =
        state.store.list_documents(&bucket, &DocumentFilter::from_query(&query)).await?;
    Ok(Json(DocumentsEnvelope { total: documents.len(), documents }))
}

async fn get_document(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<DocumentPayload>, ApiError> {
    identity.require(Permission::Read)?;
    let key = document_key(&bucket, &path)?;

    let (version, raw) = state.store.get_latest_with_info(&key).await?;
    let extraction = extract(&raw, key.path());
    Ok(Json(DocumentPayload {
        bucket: key.bucket().to_string(),
        path: key.path().to_string(),
        field_key: extraction.field_key().map(ToOwned::to_owned),
        selection: extraction.selection_kind(),
        content: extraction.text,
        version,
    }))
}

/// Save through REST. The caller must already hold the lease; an expired
/// lease of their own is renewed on the way.
async fn save_document(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
    Json(request): Json<SaveDocumentRequest>,
) -> Result<Json<SaveDocumentResponse>, ApiError> {
    identity.require(Permission::Write)?;
    let key = document_key(&bucket, &path)?;

    match state.locks.heartbeat(&key, &identity.id).await {
        Ok(_) => {}
        Err(LockError::NotFound) => {
            return Err(ApiError::from_code(ErrorCode::LockRequired)
                .with_details(json!({ "key": key.to_string() })));
        }
        Err(error) => return Err(error.into()),
    }

    let baseline = match state.store.get_latest(&key).await {
        Ok(raw) => raw,
        Err(StoreError::NotFound { .. }) => Vec::new(),
        Err(error) => return Err(error.into()),
    };
    let content = extract(&baseline, key.path()).render(&request.content)?;
    let version = state.store.put_version(&key, content).await?;

    info!(%key, identity = %identity.id, version_id = %version.version_id, "document saved via api");
    Ok(Json(SaveDocumentResponse { version }))
}

async fn list_history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<VersionsEnvelope>, ApiError> {
    identity.require(Permission::Read)?;
    let key = document_key(&bucket, &path)?;

    let versions = state.store.list_versions(&key).await?;
    Ok(Json(VersionsEnvelope { total: versions.len(), versions }))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, version_id, path)): Path<(String, String, String)>,
) -> Result<Json<VersionContent>, ApiError> {
    identity.require(Permission::Read)?;
    let key = document_key(&bucket, &path)?;

    Ok(Json(history::version_content(&state.store, &key, &version_id).await?))
}

async fn compare_versions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<ComparisonEnvelope>, ApiError> {
    identity.require(Permission::Read)?;
    let key = document_key(&bucket, &path)?;

    let comparison =
        history::compare(&state.store, &key, query.from.as_deref(), query.to.as_deref()).await?;
    Ok(Json(comparison))
}
