use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use uuid::Uuid;

use crate::capabilities::KvError;
use crate::model::{Role, SessionId, User, UserId};
use crate::{AppError, ErrorKind};

pub const FIXTURE_SESSION_PREFIX: &str = "demo-session";
pub const FIXTURE_PASSWORD: &str = "password";

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session storage failed: {0}")]
    Storage(#[from] KvError),

    #[error("session authority unavailable: {message}")]
    Unavailable { message: String },
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Storage(e) => e.is_retryable(),
            SessionError::Unavailable { .. } => true,
            _ => false,
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidCredentials => {
                AppError::new(ErrorKind::Authentication, "Invalid username or password")
            }
            SessionError::NotFound | SessionError::Expired => {
                AppError::new(ErrorKind::Authentication, e.to_string())
            }
            SessionError::Storage(e) => e.into(),
            SessionError::Unavailable { message } => {
                AppError::new(ErrorKind::Network, "Session service unavailable")
                    .with_internal(message)
            }
        }
    }
}

/// Issues and resolves session identifiers.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    async fn login(&self, username: &str, password: &SecretString) -> Result<User, SessionError>;

    async fn logout(&self, session: Option<&SessionId>) -> Result<(), SessionError>;

    /// The user a session id belongs to.
    async fn resolve(&self, session: &SessionId) -> Result<User, SessionError>;

    /// Swaps a live session id for a new one.
    async fn refresh(&self, session: &SessionId) -> Result<(SessionId, User), SessionError>;

    fn issue_session(&self, user: &User) -> SessionId;
}

/// In-memory authority over a fixed user list, for demos and tests.
///
/// Session ids have the form `demo-session:<userId>:<uuid>` and resolve by
/// looking the user id up again. Every user shares one password.
#[derive(Debug, Clone)]
pub struct FixtureAuthority {
    users: Vec<User>,
    password: String,
}

impl Default for FixtureAuthority {
    fn default() -> Self {
        let user = |id: &str, name: &str, role: Role| {
            UserId::new(id).map(|id| User::new(id, name).with_role(role))
        };
        let users = [
            user("admin", "Administrator", Role::Admin),
            user("user", "Regular User", Role::User),
            user("guest", "Guest", Role::Guest),
        ]
        .into_iter()
        .filter_map(Result::ok)
        .collect();
        Self::new(users)
    }
}

impl FixtureAuthority {
    pub fn new(users: Vec<User>) -> Self {
        Self {
            users,
            password: FIXTURE_PASSWORD.to_string(),
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    fn parse(&self, session: &SessionId) -> Option<&User> {
        let mut parts = session.as_str().split(':');
        if parts.next() != Some(FIXTURE_SESSION_PREFIX) {
            return None;
        }
        let user_id = parts.next()?;
        self.users.iter().find(|u| u.id.as_str() == user_id)
    }
}

#[async_trait]
impl SessionAuthority for FixtureAuthority {
    async fn login(&self, username: &str, password: &SecretString) -> Result<User, SessionError> {
        let user = self
            .users
            .iter()
            .find(|u| u.id.as_str() == username || u.name == username)
            .ok_or(SessionError::InvalidCredentials)?;
        if password.expose_secret() != &self.password {
            return Err(SessionError::InvalidCredentials);
        }
        Ok(user.clone())
    }

    async fn logout(&self, _session: Option<&SessionId>) -> Result<(), SessionError> {
        Ok(())
    }

    async fn resolve(&self, session: &SessionId) -> Result<User, SessionError> {
        self.parse(session).cloned().ok_or(SessionError::NotFound)
    }

    async fn refresh(&self, session: &SessionId) -> Result<(SessionId, User), SessionError> {
        let user = self.parse(session).cloned().ok_or(SessionError::Expired)?;
        Ok((self.issue_session(&user), user))
    }

    fn issue_session(&self, user: &User) -> SessionId {
        SessionId::new(format!(
            "{FIXTURE_SESSION_PREFIX}:{}:{}",
            user.id,
            Uuid::new_v4()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[tokio::test]
    async fn test_login_by_id_or_name() {
        let authority = FixtureAuthority::default();
        let by_id = authority.login("admin", &password("password")).await.unwrap();
        let by_name = authority
            .login("Administrator", &password("password"))
            .await
            .unwrap();
        assert_eq!(by_id, by_name);
        assert!(by_id.has_role(Role::Admin));
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let authority = FixtureAuthority::default();
        assert!(matches!(
            authority.login("admin", &password("nope")).await,
            Err(SessionError::InvalidCredentials)
        ));
        assert!(matches!(
            authority.login("nobody", &password("password")).await,
            Err(SessionError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let authority = FixtureAuthority::default();
        let user = authority.users()[1].clone();
        let session = authority.issue_session(&user);
        assert!(session.as_str().starts_with("demo-session:user:"));
        assert_eq!(authority.resolve(&session).await.unwrap(), user);

        let (renewed, same) = authority.refresh(&session).await.unwrap();
        assert_ne!(renewed, session);
        assert_eq!(same, user);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let authority = FixtureAuthority::default();
        assert!(matches!(
            authority.resolve(&SessionId::new("other:admin:x")).await,
            Err(SessionError::NotFound)
        ));
        assert!(matches!(
            authority.refresh(&SessionId::new("demo-session:ghost:x")).await,
            Err(SessionError::Expired)
        ));
    }
}
