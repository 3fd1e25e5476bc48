// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::approval::ApprovalError;
use crate::auth::TokenError;
use crate::database::StoreError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),

    /// Domain rejection with its own stable code
    Approval {
        status: u16,
        code: &'static str,
        message: String,
    },
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::Approval { status, .. } => *status,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::InvalidJson(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
            ApiError::Approval { message, .. } => message,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        })
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Approval { code, .. } => *code,
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert other error types to ApiError
impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        let status = match &err {
            ApprovalError::DocumentNotFound(_) | ApprovalError::LineNotFound { .. } => 404,
            ApprovalError::TenantMismatch { .. }
            | ApprovalError::NotAuthorizedToApprove(_)
            | ApprovalError::NotDocumentOwner
            | ApprovalError::PermissionDenied(_) => 403,
            ApprovalError::InvalidStateTransition { .. }
            | ApprovalError::LineNotActive(_)
            | ApprovalError::AlreadyProcessed(_)
            | ApprovalError::DocumentAlreadyFinalized(_)
            | ApprovalError::ConcurrentModification => 409,
            ApprovalError::SelfApproval
            | ApprovalError::InvalidDelegate(_)
            | ApprovalError::EmptyApprovalChain => 422,
            ApprovalError::Notification(_) => 502,
            ApprovalError::Storage(store) => return ApiError::from_store(store),
        };

        ApiError::Approval {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl ApiError {
    fn from_store(err: &StoreError) -> Self {
        match err {
            StoreError::Binding(bind) => {
                // Fail closed without telling the client which tenant was involved
                tracing::error!("Tenant binding failed: {}", bind);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            StoreError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
            other => {
                tracing::error!("Storage error: {}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::unauthorized(err.to_string())
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::DocumentStatus;
    use uuid::Uuid;

    #[test]
    fn approval_errors_keep_their_codes() {
        let err: ApiError = ApprovalError::LineNotActive(Uuid::nil()).into();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.error_code(), "LINE_NOT_ACTIVE");

        let err: ApiError = ApprovalError::AlreadyProcessed(DocumentStatus::Approved).into();
        assert_eq!(err.to_json()["code"], "ALREADY_PROCESSED");

        let err: ApiError = ApprovalError::NotAuthorizedToApprove(Uuid::nil()).into();
        assert_eq!(err.status_code(), 403);

        let err: ApiError = ApprovalError::InvalidDelegate(Uuid::nil()).into();
        assert_eq!(err.status_code(), 422);
        assert_eq!(err.error_code(), "INVALID_DELEGATE");
    }

    #[test]
    fn binding_failures_do_not_leak_details() {
        let err: ApiError = ApprovalError::Storage(StoreError::Binding(
            crate::database::BindError::MissingTenantContext,
        ))
        .into();
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.message(), "Database temporarily unavailable");
    }
}
