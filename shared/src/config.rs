use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capabilities::{ValidatedUrl, DEFAULT_TIMEOUT_MS};
use crate::{AppError, AppResult, ErrorKind, DEFAULT_PAGE_SIZE};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const REFRESH_TOKEN_HEADER: &str = "X-Refresh-Token";
pub const DEFAULT_CHANNEL_NAME: &str = "auth-session";
pub const DEFAULT_SESSION_KEY: &str = "session-id";
pub const DEFAULT_SESSION_REQUEST_TIMEOUT_MS: u64 = 600;

fn invalid(message: impl Into<String>) -> AppError {
    AppError::new(ErrorKind::Validation, message)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub refresh_path: String,
    pub authorization_header: String,
    pub refresh_token_header: String,
    /// Unwrap `{ result, data }` response envelopes into their payload.
    pub unwrap_envelope: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            authorization_header: AUTHORIZATION_HEADER.to_string(),
            refresh_token_header: REFRESH_TOKEN_HEADER.to_string(),
            unwrap_envelope: true,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> AppResult<ValidatedUrl> {
        ValidatedUrl::new(self.base_url.clone()).map_err(AppError::from)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.base_url()?;
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be > 0"));
        }
        if !self.refresh_path.starts_with('/') {
            return Err(invalid("refresh_path must start with '/'"));
        }
        if self.authorization_header.trim().is_empty()
            || self.refresh_token_header.trim().is_empty()
        {
            return Err(invalid("header names cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub channel_name: String,
    pub request_timeout_ms: u64,
    pub session_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            request_timeout_ms: DEFAULT_SESSION_REQUEST_TIMEOUT_MS,
            session_key: DEFAULT_SESSION_KEY.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.channel_name.trim().is_empty() {
            return Err(invalid("channel_name cannot be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms must be > 0"));
        }
        if self.session_key.trim().is_empty() {
            return Err(invalid("session_key cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDefaults {
    pub page_size: u32,
}

impl Default for TableDefaults {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TableDefaults {
    pub fn validate(&self) -> AppResult<()> {
        if self.page_size == 0 {
            return Err(invalid("page_size must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: TransportConfig,
    pub session: SessionConfig,
    pub table: TableDefaults,
}

impl AppConfig {
    /// Parses and validates. Missing sections and fields take defaults.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| {
            AppError::new(ErrorKind::Deserialization, "invalid configuration")
                .with_internal(e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.api.validate()?;
        self.session.validate()?;
        self.table.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.timeout_ms, 10_000);
        assert_eq!(config.session.request_timeout(), Duration::from_millis(600));
        assert_eq!(config.session.channel_name, "auth-session");
        assert_eq!(config.table.page_size, 10);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            AppConfig::from_json(r#"{"api":{"base_url":"https://admin.example.com/api"}}"#)
                .unwrap();
        assert_eq!(config.api.base_url, "https://admin.example.com/api");
        assert_eq!(config.api.refresh_path, "/auth/refresh");
        assert_eq!(config.table, TableDefaults::default());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let err = AppConfig::from_json(r#"{"api":{"base_url":"ftp://example.com"}}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = AppConfig::from_json(r#"{"api":{"base_url":"https://u:p@example.com"}}"#)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.table.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        let err = AppConfig::from_json("{").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Deserialization);
    }
}
