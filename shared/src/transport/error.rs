use thiserror::Error;

use super::envelope::{result_code, ErrorDetail};
use crate::capabilities::{HttpError, KvError};
use crate::{AppError, ErrorKind};

pub const NETWORK_ERROR_MESSAGE: &str = "Unable to connect to server. Please try again.";

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Well-formed failure envelope from the server.
    #[error("{message} ({code})")]
    Envelope {
        status: u16,
        code: String,
        message: String,
        detail: Option<ErrorDetail>,
    },

    #[error("unauthorized")]
    Unauthorized,

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("token refresh failed: {0}")]
    RefreshFailed(Box<ApiError>),

    #[error("unexpected status {status}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {message}")]
    Decode { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("credential storage failed: {0}")]
    Storage(#[from] KvError),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network { .. } | ApiError::Timeout { .. } => true,
            ApiError::Status { status, .. } | ApiError::Envelope { status, .. } => {
                matches!(status, 429 | 502 | 503 | 504)
            }
            ApiError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Credentials are gone or unusable; the user has to sign in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized | ApiError::NoRefreshToken | ApiError::RefreshFailed(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Envelope { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::Unauthorized => Some(401),
            _ => None,
        }
    }
}

impl From<HttpError> for ApiError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Network { message } => ApiError::Network { message },
            HttpError::Timeout { timeout_ms } => ApiError::Timeout { timeout_ms },
            HttpError::Serialization { message } => ApiError::InvalidRequest { message },
            other => ApiError::InvalidRequest {
                message: other.to_string(),
            },
        }
    }
}

fn kind_for_code(code: &str, status: u16) -> ErrorKind {
    match code {
        result_code::BAD_REQUEST => ErrorKind::Validation,
        result_code::UNAUTHORIZED => ErrorKind::Authentication,
        result_code::FORBIDDEN => ErrorKind::Authorization,
        result_code::NOT_FOUND => ErrorKind::NotFound,
        result_code::CONFLICT => ErrorKind::Conflict,
        result_code::SERVICE_UNAVAILABLE => ErrorKind::FeatureUnavailable,
        result_code::METHOD_NOT_ALLOWED | result_code::INTERNAL_ERROR => ErrorKind::Internal,
        _ => AppError::from_http_status(status, None).kind,
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Network { message } => {
                AppError::new(ErrorKind::Network, NETWORK_ERROR_MESSAGE).with_internal(message)
            }
            ApiError::Timeout { timeout_ms } => {
                AppError::new(ErrorKind::Timeout, "Request timed out")
                    .with_context("timeout_ms", timeout_ms.to_string())
            }
            ApiError::Envelope {
                status,
                code,
                message,
                detail,
            } => {
                let mut err = AppError::new(kind_for_code(&code, status), message)
                    .with_context("code", code)
                    .with_context("http_status", status.to_string());
                if let Some(error_type) = detail.and_then(|d| d.error_type) {
                    err = err.with_context("error_type", error_type);
                }
                err
            }
            ApiError::Unauthorized | ApiError::NoRefreshToken => {
                AppError::new(ErrorKind::Authentication, e.to_string())
            }
            ApiError::RefreshFailed(inner) => {
                AppError::new(ErrorKind::Authentication, "Session expired")
                    .with_internal(inner.to_string())
            }
            ApiError::Status { status, body } => {
                AppError::from_http_status(status, Some(body.as_bytes()))
            }
            ApiError::Decode { message } => {
                AppError::new(ErrorKind::Deserialization, "Unexpected response from server")
                    .with_internal(message)
            }
            ApiError::InvalidRequest { message } => AppError::new(ErrorKind::Validation, message),
            ApiError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_maps_to_connectivity_message() {
        let app: AppError = ApiError::Network {
            message: "connection refused".into(),
        }
        .into();
        assert_eq!(app.kind, ErrorKind::Network);
        assert_eq!(app.message, NETWORK_ERROR_MESSAGE);
        assert_eq!(app.code(), "NETWORK_ERROR");
    }

    #[test]
    fn test_envelope_preserves_code_and_type() {
        let app: AppError = ApiError::Envelope {
            status: 409,
            code: "E409".into(),
            message: "Already exists".into(),
            detail: Some(ErrorDetail {
                error_type: Some("/errors/conflict".into()),
                ..ErrorDetail::default()
            }),
        }
        .into();
        assert_eq!(app.kind, ErrorKind::Conflict);
        assert_eq!(app.message, "Already exists");
        assert_eq!(app.context.get("code").map(String::as_str), Some("E409"));
        assert_eq!(
            app.context.get("error_type").map(String::as_str),
            Some("/errors/conflict")
        );
    }

    #[test]
    fn test_auth_failures() {
        assert!(ApiError::NoRefreshToken.is_auth_failure());
        assert!(ApiError::RefreshFailed(Box::new(ApiError::Unauthorized)).is_auth_failure());
        let app: AppError = ApiError::RefreshFailed(Box::new(ApiError::Status {
            status: 500,
            body: String::new(),
        }))
        .into();
        assert_eq!(app.kind, ErrorKind::Authentication);
    }

    #[test]
    fn test_retryable() {
        assert!(ApiError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!ApiError::Unauthorized.is_retryable());
        assert!(ApiError::Status { status: 503, body: String::new() }.is_retryable());
    }
}
