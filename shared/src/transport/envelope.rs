use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod result_code {
    pub const OK: &str = "S200";
    pub const BAD_REQUEST: &str = "E400";
    pub const INVALID_PARAMETER: &str = "E400";
    pub const UNAUTHORIZED: &str = "E401";
    pub const FORBIDDEN: &str = "E403";
    pub const NOT_FOUND: &str = "E404";
    pub const METHOD_NOT_ALLOWED: &str = "E405";
    pub const CONFLICT: &str = "E409";
    pub const INTERNAL_ERROR: &str = "E500";
    pub const SERVICE_UNAVAILABLE: &str = "E503";
}

/// Problem-detail `type` URIs.
pub mod error_type {
    pub const BAD_REQUEST: &str = "/errors/bad-request";
    pub const VALIDATION: &str = "/errors/validation";
    pub const UNAUTHORIZED: &str = "/errors/unauthorized";
    pub const FORBIDDEN: &str = "/errors/forbidden";
    pub const NOT_FOUND: &str = "/errors/not-found";
    pub const METHOD_NOT_ALLOWED: &str = "/errors/method-not-allowed";
    pub const CONFLICT: &str = "/errors/conflict";
    pub const BIZ: &str = "/errors/biz";
    pub const INTERNAL: &str = "/errors/internal";
    pub const SERVICE_UNAVAILABLE: &str = "/errors/service-unavailable";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiResult {
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub field_errors: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T = Value> {
    pub result: ApiResult,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            result: ApiResult::Success,
            code: result_code::OK.to_string(),
            message: String::new(),
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(code: impl Into<String>, message: impl Into<String>, error: ErrorDetail) -> Self {
        Self {
            result: ApiResult::Fail,
            code: code.into(),
            message: message.into(),
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ApiResult::Success
    }

    /// Human-readable failure text: the problem detail if present, else the
    /// envelope message.
    pub fn failure_message(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.detail.clone())
            .unwrap_or_else(|| self.message.clone())
    }
}

/// True for a JSON object carrying a `result` field.
pub(crate) fn looks_like_envelope(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("result"))
}
