use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use spine_core::{Predicate, PrimaryKey, SlotValues, SpineError, Value};

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Requested session timeout in seconds
    pub timeout: Option<u64>,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.username.is_empty() {
            return Err("username is required".to_string());
        }
        if self.timeout == Some(0) {
            return Err("timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct InvokeRequest {
    pub class: String,
    pub key: PrimaryKey,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Deserialize)]
pub struct CreateRequest {
    pub class: String,
    #[serde(default)]
    pub values: SlotValues,
}

#[derive(Deserialize)]
pub struct EntityRequest {
    pub class: String,
    pub key: PrimaryKey,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub class: String,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}

#[derive(Deserialize)]
pub struct DumpRequest {
    pub class: String,
    pub keys: Vec<PrimaryKey>,
}

#[derive(Deserialize)]
pub struct InterfaceParams {
    /// "json" (default) or "idl"
    pub format: Option<String>,
    #[serde(default)]
    pub docs: bool,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exception name from the interface description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            exception: None,
            retryable: false,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            exception: None,
            retryable: false,
        }
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub timeout: u64,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub transaction_id: u32,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub class: String,
    pub key: PrimaryKey,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub cached_entities: usize,
    pub tracked_locks: usize,
    pub version: String,
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Failure of an HTTP call, rendered as an [`ApiResponse`] envelope.
#[derive(Debug)]
pub enum ApiError {
    Spine(SpineError),
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl From<SpineError> for ApiError {
    fn from(err: SpineError) -> Self {
        ApiError::Spine(err)
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// HTTP status for a core error.
pub fn status_for(err: &SpineError) -> StatusCode {
    match err {
        SpineError::Authentication { .. } | SpineError::SessionExpired { .. } => {
            StatusCode::UNAUTHORIZED
        }
        SpineError::Authorization { .. } => StatusCode::FORBIDDEN,
        SpineError::NotFound { .. } => StatusCode::NOT_FOUND,
        SpineError::ObjectDeleted { .. } => StatusCode::GONE,
        SpineError::Locked { .. }
        | SpineError::AlreadyExists { .. }
        | SpineError::TransactionClosed { .. }
        | SpineError::LostLock { .. }
        | SpineError::Cancelled => StatusCode::CONFLICT,
        SpineError::ImmutableAttribute { .. } | SpineError::InvalidArgument { .. } => {
            StatusCode::BAD_REQUEST
        }
        SpineError::Commit { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SpineError::InvalidModel { .. } | SpineError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Spine(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                let mut body = ApiResponse::<()>::err(err.to_string());
                body.exception = Some(err.exception_name());
                body.retryable = err.is_retryable();
                (status, body)
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ApiResponse::err(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiResponse::err(msg)),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::err(msg))
            }
        };
        (status, Json(body)).into_response()
    }
}
