// HTTP API.
//
// Every /v1 route sits behind bearer auth; handlers check the caller's
// permission and map domain errors through `ApiError`.

mod documents;
mod locks;

use std::sync::Arc;

use axum::{middleware, Router};
use inkwell_common::types::DocumentKey;

use crate::{
    auth::{jwt::TokenService, middleware::require_bearer_auth},
    error::ApiError,
    lock::LockManager,
    session::SessionConfig,
    store::VersionStore,
};

/// Shared handles for every handler and WebSocket session.
#[derive(Clone)]
pub struct AppState {
    pub locks: LockManager,
    pub store: VersionStore,
    pub tokens: Arc<TokenService>,
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(
        locks: LockManager,
        store: VersionStore,
        tokens: Arc<TokenService>,
        session: SessionConfig,
    ) -> Self {
        Self { locks, store, tokens, session }
    }
}

pub fn router(state: AppState) -> Router {
    let tokens = state.tokens.clone();

    Router::new()
        .merge(documents::routes())
        .merge(locks::routes())
        .merge(crate::ws::routes())
        .route_layer(middleware::from_fn_with_state(tokens, require_bearer_auth))
        .with_state(state)
}

pub(crate) fn document_key(bucket: &str, path: &str) -> Result<DocumentKey, ApiError> {
    Ok(DocumentKey::new(bucket, path)?)
}
