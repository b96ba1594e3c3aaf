//! User API error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic for server-side
//! failures; the actual error travels to the telemetry pipeline through the
//! [`RequestFailure`] response extension.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// User API error type.
///
/// Maps to HTTP status codes:
/// - Database, Internal: 500 Internal Server Error
/// - NotFound: 404 Not Found
/// - BadRequest, AlreadyExists: 400 Bad Request
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unique key violation on create or update.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Database(_) | ApiError::Internal => 500,
            ApiError::NotFound(_) => 404,
            ApiError::BadRequest(_) | ApiError::AlreadyExists(_) => 400,
        }
    }

    /// Stable machine-readable error code, used in response bodies and as
    /// the `error_type` of error audit documents.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::AlreadyExists(_) => "ALREADY_EXISTS",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Marks a response as the outcome of a failed request.
///
/// Inserted into the response extensions by [`ApiError`] and by the panic
/// handler. The telemetry middleware reads it to take the failure path; the
/// response itself is returned to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub error_type: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "user_api.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal database error occurred".to_string(),
                )
            }
            ApiError::NotFound(resource) => (StatusCode::NOT_FOUND, resource.clone()),
            ApiError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::AlreadyExists(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            ),
        };

        let failure = RequestFailure {
            error_type: self.code().to_string(),
            message: self.to_string(),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();
        response.extensions_mut().insert(failure);
        response
    }
}

/// Convert sqlx errors to ApiError
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return ApiError::AlreadyExists("username or email already exists".to_string());
            }
        }
        ApiError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    // Helper function to read the response body as JSON
    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_database_error() {
        let error = ApiError::Database("connection failed".to_string());
        assert_eq!(format!("{}", error), "Database error: connection failed");
    }

    #[test]
    fn test_display_already_exists() {
        let error = ApiError::AlreadyExists("username taken".to_string());
        assert_eq!(format!("{}", error), "Already exists: username taken");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Database("test".to_string()).status_code(), 500);
        assert_eq!(ApiError::NotFound("test".to_string()).status_code(), 404);
        assert_eq!(ApiError::BadRequest("test".to_string()).status_code(), 400);
        assert_eq!(ApiError::AlreadyExists("test".to_string()).status_code(), 400);
        assert_eq!(ApiError::Internal.status_code(), 500);
    }

    #[tokio::test]
    async fn test_into_response_database_error_hides_details() {
        let error = ApiError::Database("connection failed".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // Telemetry still sees the real cause
        let failure = response.extensions().get::<RequestFailure>().unwrap();
        assert_eq!(failure.error_type, "DATABASE_ERROR");
        assert_eq!(failure.message, "Database error: connection failed");

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "DATABASE_ERROR");
        assert_eq!(
            body_json["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        let error = ApiError::NotFound("User not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<RequestFailure>().is_some());

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "NOT_FOUND");
        assert_eq!(body_json["error"]["message"], "User not found");
    }

    #[tokio::test]
    async fn test_into_response_already_exists_is_bad_request() {
        let error = ApiError::AlreadyExists("username or email already exists".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "ALREADY_EXISTS");
        assert_eq!(
            body_json["error"]["message"],
            "username or email already exists"
        );
    }

    #[tokio::test]
    async fn test_into_response_internal() {
        let response = ApiError::Internal.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body_json["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_database_error() {
        let error: ApiError = sqlx::Error::RowNotFound.into();
        assert!(matches!(error, ApiError::Database(_)));
    }
}
