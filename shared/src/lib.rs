// lib.rs - Admin dashboard client core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod change;
pub mod config;
pub mod context;
pub mod model;
pub mod query;
pub mod route;
pub mod session;
pub mod store;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use capabilities::{HttpError, KvError, StorageErrorCode};

pub use change::{has_changed, search_comparator, ChangeOptions, Comparator};
pub use config::{AppConfig, SessionConfig, TableDefaults, TransportConfig};
pub use context::{AppContext, AppContextBuilder};
pub use model::{Role, SessionId, User, UserId};
pub use query::canonicalize_query;
pub use route::{is_in_scope, watch_route, RouteScopedReset, RouteWatch};
pub use session::{SessionManager, SessionMessage};
pub use store::{StoreRegistry, TablePageOptions, TablePageStore, UserStore};
pub use transport::{ApiClient, ApiError};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    FeatureUnavailable,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::FeatureUnavailable => "FEATURE_UNAVAILABLE",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Conflict | Self::RateLimited | Self::Storage => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Deserialization | Self::Internal | Self::InvalidState => {
                ErrorSeverity::Fatal
            }

            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::FeatureUnavailable
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage | Self::Conflict
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub retry_after_ms: Option<u64>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            retry_after_ms: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    /// Text a dashboard can show as-is. Server-provided messages pass through
    /// for validation and conflict errors since they name the offending field.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => transport::NETWORK_ERROR_MESSAGE.into(),
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authorization => {
                "You don't have permission to perform this action.".into()
            }
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::FeatureUnavailable => {
                self.message.clone()
            }
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::RateLimited => {
                if let Some(retry_after) = self.retry_after_ms {
                    let seconds = retry_after / 1000;
                    format!("Too many requests. Please wait {seconds} seconds and try again.")
                } else {
                    "Too many requests. Please wait a moment and try again.".into()
                }
            }
            ErrorKind::Storage => "Unable to save data locally.".into(),
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::InvalidState => {
                "The page is in an invalid state. Please reload.".into()
            }
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }

    /// Classifies a non-success response. The message comes from a response
    /// envelope in `body` when there is one.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            408 => ErrorKind::Timeout,
            503 => ErrorKind::FeatureUnavailable,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<transport::ApiResponse>(b).ok())
            .map(|e| e.failure_message())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        match &e {
            KvError::InvalidKey { .. } => AppError::new(ErrorKind::Validation, e.to_string()),
            KvError::ValueTooLarge { .. } => AppError::new(ErrorKind::Storage, e.to_string()),
            KvError::Storage {
                code: StorageErrorCode::Corrupted,
                ..
            } => AppError::new(ErrorKind::Storage, "Local storage is corrupted")
                .with_severity(ErrorSeverity::Fatal)
                .with_internal(e.to_string()),
            KvError::Storage { .. } => {
                AppError::new(ErrorKind::Storage, "Local storage failed").with_internal(e.to_string())
            }
            KvError::Serialization { .. } => {
                AppError::new(ErrorKind::Deserialization, "Stored data is unreadable")
                    .with_internal(e.to_string())
            }
        }
    }
}

impl From<HttpError> for AppError {
    fn from(e: HttpError) -> Self {
        match &e {
            HttpError::Network { .. } => {
                AppError::new(ErrorKind::Network, transport::NETWORK_ERROR_MESSAGE)
                    .with_internal(e.to_string())
            }
            HttpError::Timeout { .. } => AppError::new(ErrorKind::Timeout, e.to_string()),
            HttpError::Serialization { .. } => {
                AppError::new(ErrorKind::Serialization, e.to_string())
            }
            HttpError::InvalidUrl { .. }
            | HttpError::InvalidHeader { .. }
            | HttpError::TooManyHeaders { .. }
            | HttpError::BodyTooLarge { .. }
            | HttpError::InvalidRequest { .. } => {
                AppError::new(ErrorKind::Validation, e.to_string())
            }
        }
    }
}
