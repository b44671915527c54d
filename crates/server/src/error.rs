use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use inkwell_common::{content::ContentError, path::PathError};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{lock::LockError, session::SessionError, store::StoreError};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    AuthInvalidToken,
    AuthForbidden,
    NotFound,
    LockConflict,
    LockLost,
    LockRequired,
    InvalidState,
    PayloadTooLarge,
    BackendUnavailable,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            Self::AuthForbidden => "AUTH_FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::LockConflict => "LOCK_CONFLICT",
            Self::LockLost => "LOCK_LOST",
            Self::LockRequired => "LOCK_REQUIRED",
            Self::InvalidState => "INVALID_STATE",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::AuthInvalidToken => StatusCode::UNAUTHORIZED,
            Self::AuthForbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::LockConflict => StatusCode::CONFLICT,
            Self::LockLost => StatusCode::CONFLICT,
            Self::LockRequired => StatusCode::PRECONDITION_REQUIRED,
            Self::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::BackendUnavailable | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::AuthInvalidToken => "invalid authentication token",
            Self::AuthForbidden => "caller lacks required permission",
            Self::NotFound => "requested resource not found",
            Self::LockConflict => "document is locked by another editor",
            Self::LockLost => "document lease was taken over by another editor",
            Self::LockRequired => "a document lease is required for this operation",
            Self::InvalidState => "operation is not valid in the current state",
            Self::PayloadTooLarge => "payload exceeds maximum allowed size",
            Self::BackendUnavailable => "storage backend is unavailable",
            Self::InternalError => "internal server error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Value,
    request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}), request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Value {
        &self.details
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

// ── Domain error mapping ───────────────────────────────────────────

impl From<LockError> for ApiError {
    fn from(error: LockError) -> Self {
        let message = error.to_string();
        match error {
            LockError::Conflict { holder } => Self::new(ErrorCode::LockConflict, message)
                .with_details(json!({ "holder": holder })),
            LockError::LockLost { holder } => {
                Self::new(ErrorCode::LockLost, message).with_details(json!({ "holder": holder }))
            }
            LockError::NotFound => Self::new(ErrorCode::NotFound, message),
            LockError::InvalidTtl => Self::new(ErrorCode::ValidationFailed, message),
            LockError::BackendUnavailable(_) => Self::new(ErrorCode::BackendUnavailable, message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let message = error.to_string();
        match error {
            StoreError::NotFound { key } => {
                Self::new(ErrorCode::NotFound, message).with_details(json!({ "key": key }))
            }
            StoreError::VersionNotFound { key, version_id } => {
                Self::new(ErrorCode::NotFound, message)
                    .with_details(json!({ "key": key, "version_id": version_id }))
            }
            StoreError::BackendUnavailable(_) => Self::new(ErrorCode::BackendUnavailable, message),
        }
    }
}

impl From<ContentError> for ApiError {
    fn from(error: ContentError) -> Self {
        match error {
            ContentError::InvalidState(_) => Self::new(ErrorCode::InvalidState, error.to_string()),
            ContentError::Serialize(_) => Self::from_code(ErrorCode::InternalError),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::ReadOnly { holder } => {
                let api_error = Self::new(ErrorCode::LockConflict, "session is read-only");
                match holder {
                    Some(holder) => api_error.with_details(json!({ "holder": holder })),
                    None => api_error,
                }
            }
            SessionError::Stale { latest_version_id } => Self::new(
                ErrorCode::LockLost,
                "document changed since it was loaded; reacquire to continue",
            )
            .with_details(json!({ "version_id": latest_version_id })),
            SessionError::Closed => Self::new(ErrorCode::InvalidState, "session is closed"),
            SessionError::Lock(error) => error.into(),
            SessionError::Store(error) => error.into(),
            SessionError::Content(error) => error.into(),
        }
    }
}

impl From<PathError> for ApiError {
    fn from(error: PathError) -> Self {
        Self::new(ErrorCode::ValidationFailed, error.to_string())
    }
}

// ── Request id scope ───────────────────────────────────────────────

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}
