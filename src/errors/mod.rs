use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::{
    contacts::{ContactError, ContactStoreError},
    session::error::SessionError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{error}: {message}")]
    Http {
        status: StatusCode,
        error: &'static str,
        message: Value,
    },
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: u16,
    error: &'static str,
    response: ErrorResponse,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: Value,
}

impl AppError {
    pub fn new(status: StatusCode, error: &'static str, message: Value) -> Self {
        Self::Http {
            status,
            error,
            message,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Bad Request", json!([message.into()]))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found", json!([message.into()]))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "Conflict", json!([message.into()]))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            json!([message.into()]),
        )
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "Bad Gateway", json!([message.into()]))
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable",
            json!([message.into()]),
        )
    }

    /// Status code this error renders with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
        }
    }
}

impl From<SessionError> for AppError {
    fn from(error: SessionError) -> Self {
        let message = error.to_string();
        match error {
            SessionError::InvalidUserId => Self::bad_request(message),
            SessionError::NotFound => Self::not_found(message),
            SessionError::NotConnected => Self::conflict(message),
            SessionError::ConnectTimeout | SessionError::Client(_) => Self::service_unavailable(message),
            SessionError::SessionClosed | SessionError::Credentials(_) => Self::internal(message),
        }
    }
}

impl From<ContactStoreError> for AppError {
    fn from(error: ContactStoreError) -> Self {
        match error {
            ContactStoreError::NotFound(_) => Self::not_found(error.to_string()),
            ContactStoreError::Join(_) => Self::internal(error.to_string()),
            _ => Self::bad_gateway(error.to_string()),
        }
    }
}

impl From<ContactError> for AppError {
    fn from(error: ContactError) -> Self {
        match error {
            ContactError::InvalidUserId => Self::bad_request(error.to_string()),
            ContactError::Listing(_) => Self::bad_gateway(error.to_string()),
            ContactError::Store(inner) => inner.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Http {
                status,
                error,
                message,
            } => (
                status,
                Json(ErrorEnvelope {
                    status: status.as_u16(),
                    error,
                    response: ErrorResponse { message },
                }),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_http_statuses() {
        assert_eq!(AppError::from(SessionError::InvalidUserId).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(SessionError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(SessionError::NotConnected).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::from(SessionError::ConnectTimeout).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn missing_contact_is_not_found() {
        let error = ContactError::Store(ContactStoreError::NotFound("c1".to_owned()));
        assert_eq!(AppError::from(error).status(), StatusCode::NOT_FOUND);
    }
}
