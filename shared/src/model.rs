use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{AppError, ErrorKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Non-empty, trimmed, and free of `:` so it can be embedded in session ids.
    pub fn new(id: impl Into<String>) -> Result<Self, AppError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AppError::new(ErrorKind::Validation, "user id cannot be empty"));
        }
        if id.trim() != id || id.contains(':') {
            return Err(AppError::new(ErrorKind::Validation, "user id contains invalid characters")
                .with_context("user_id", id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque per-tab session identifier.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Session ids grant access; keep them out of logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId(<{} chars>)", self.0.len())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Guest,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "guest" => Ok(Self::Guest),
            other => Err(AppError::new(ErrorKind::Validation, "unknown role")
                .with_context("role", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated user as the server and sibling tabs describe it.
/// Roles stay free-form strings on the wire; [`Role`] names the known ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: None,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role.as_str().to_string());
        self
    }

    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|r| r.parse().ok())
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role() == Some(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::new("u-1").is_ok());
        assert!(UserId::new("").is_err());
        assert!(UserId::new("  ").is_err());
        assert!(UserId::new("a:b").is_err());
        assert!(UserId::new(" a").is_err());
    }

    #[test]
    fn test_user_wire_format() {
        let user = User::new(UserId::new("1").unwrap(), "Kim").with_role(Role::Admin);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json, serde_json::json!({ "id": "1", "name": "Kim", "role": "admin" }));

        let back: User = serde_json::from_value(json).unwrap();
        assert!(back.has_role(Role::Admin));

        let bad = serde_json::from_value::<User>(serde_json::json!({ "id": "", "name": "x" }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_unknown_role_is_none() {
        let user: User =
            serde_json::from_value(serde_json::json!({ "id": "2", "name": "Lee", "role": "ops" }))
                .unwrap();
        assert_eq!(user.role(), None);
        assert_eq!(user.role.as_deref(), Some("ops"));
    }

    #[test]
    fn test_session_id_debug_is_redacted() {
        let id = SessionId::new("demo-session:1:abc");
        assert!(!format!("{id:?}").contains("demo-session"));
    }
}
