// Bearer authentication for every /v1 route, including the session upgrade.
// A verified caller is attached to the request as an `Identity` extension;
// handlers decide what that identity may do.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::{jwt::TokenService, Identity};
use crate::error::{ApiError, ErrorCode};

pub async fn require_bearer_auth(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&tokens, request.headers()) {
        Ok(identity) => {
            debug!(identity = %identity.id, role = identity.role.as_str(), "caller authenticated");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}

fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| ApiError::new(ErrorCode::AuthInvalidToken, "missing bearer token"))?;

    tokens.validate(token).map_err(|error| {
        debug!(error = %error, "bearer token rejected");
        ApiError::new(ErrorCode::AuthInvalidToken, "invalid bearer token")
    })
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}
