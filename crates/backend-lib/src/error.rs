// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_common::{ProtocolError, ServerMessage};
use thiserror::Error;

use crate::directory::DirectoryError;
use crate::validation::ValidationError;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Meeting not found")]
    MeetingNotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Connection has not joined the meeting")]
    NotJoined,

    #[error("Connection joined as {expected} but message claims {claimed}")]
    UserMismatch { expected: String, claimed: String },
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::MeetingNotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidInput(_) | AppError::Protocol(_) | AppError::Json(_) => {
                StatusCode::BAD_REQUEST
            },
            AppError::NotJoined | AppError::UserMismatch { .. } => StatusCode::FORBIDDEN,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NF_001",
            AppError::MeetingNotFound => "MEET_001",
            AppError::Conflict(_) => "CONFLICT_001",
            AppError::StoreUnavailable(_) => "STORE_001",
            AppError::Json(_) => "JSON_001",
            AppError::Protocol(_) => "PROTO_001",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::NotJoined => "SESSION_001",
            AppError::UserMismatch { .. } => "SESSION_002",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::NotFound(_) | AppError::MeetingNotFound => "Resource not found".to_string(),
            AppError::Conflict(_) => "Resource already exists".to_string(),
            AppError::StoreUnavailable(_) => {
                "Service temporarily unavailable, please try again".to_string()
            },
            AppError::Json(_) | AppError::Protocol(_) => "Invalid message format".to_string(),
            AppError::InvalidInput(_) => "Invalid input provided".to_string(),
            AppError::NotJoined => "Join the meeting first".to_string(),
            AppError::UserMismatch { .. } => "Message does not match the joined user".to_string(),
        }
    }

    fn message(&self) -> String {
        // Use detailed messages in development, sanitized in production
        if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        }
    }

    /// Socket-level report sent only to the connection whose frame failed
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.error_code().to_string(),
            message: self.message(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Create a JSON response with error details
        let body = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.message(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => AppError::NotFound("record".to_string()),
            DirectoryError::Conflict => AppError::Conflict("record".to_string()),
            DirectoryError::StoreUnavailable(reason) => AppError::StoreUnavailable(reason),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        assert_eq!(AppError::MeetingNotFound.to_string(), "Meeting not found");
        assert_eq!(
            AppError::UserMismatch {
                expected: "a".to_string(),
                claimed: "b".to_string()
            }
            .to_string(),
            "Connection joined as a but message claims b"
        );
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(AppError::MeetingNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::StoreUnavailable("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::InvalidInput("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotJoined.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_error_from_impls() {
        let app_err: AppError = DirectoryError::StoreUnavailable("io".to_string()).into();
        assert!(matches!(app_err, AppError::StoreUnavailable(_)));
        assert_eq!(app_err.error_code(), "STORE_001");

        let app_err: AppError = ValidationError::MissingPayload("sdp").into();
        assert!(matches!(app_err, AppError::InvalidInput(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let app_err: AppError = json_err.into();
        assert_eq!(app_err.error_code(), "JSON_001");

        let app_err: AppError = ProtocolError::ReservedType("ERROR".to_string()).into();
        assert_eq!(app_err.error_code(), "PROTO_001");
        assert_eq!(app_err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_to_server_message() {
        let msg = AppError::NotJoined.to_server_message();
        let ServerMessage::Error { code, .. } = msg else {
            panic!("expected error message");
        };
        assert_eq!(code, "SESSION_001");
    }

    #[tokio::test]
    async fn test_error_into_response() {
        let response = AppError::MeetingNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));
    }
}
