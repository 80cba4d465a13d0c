use secrecy::SecretString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::instrument;

use super::authority::{SessionAuthority, SessionError};
use super::channel::{SessionChannel, SessionMessage};
use crate::capabilities::{KeyNamespace, KvKey, LocalStore};
use crate::config::SessionConfig;
use crate::model::{SessionId, User};
use crate::store::UserStore;

/// Shared state the responder task needs after the manager hands it off.
struct SessionShared {
    local: Arc<dyn LocalStore>,
    session_key: KvKey,
    users: Arc<UserStore>,
    authority: Arc<dyn SessionAuthority>,
    channel: Option<Arc<dyn SessionChannel>>,
}

impl SessionShared {
    fn session_id(&self) -> Result<Option<SessionId>, SessionError> {
        Ok(self
            .local
            .get(&self.session_key)?
            .filter(|id| !id.trim().is_empty())
            .map(SessionId::new))
    }

    fn clear_session(&self) -> Result<(), SessionError> {
        self.local.remove(&self.session_key)?;
        Ok(())
    }

    async fn handle(&self, message: SessionMessage) {
        match message {
            SessionMessage::RequestSession => self.answer_request().await,
            SessionMessage::Logout => {
                tracing::info!("logout broadcast received");
                if let Err(e) = self.clear_session() {
                    tracing::warn!(error = %e, "failed to clear session id");
                }
                self.users.clear_user();
            }
            SessionMessage::ResponseSession { .. } => {}
        }
    }

    async fn answer_request(&self) {
        let Some(channel) = &self.channel else {
            return;
        };
        let session_id = match self.session_id() {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read session id");
                return;
            }
        };

        let user = match self.users.user() {
            Some(user) => user,
            None => match self.authority.resolve(&session_id).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::debug!(error = %e, "cannot answer session request");
                    return;
                }
            },
        };

        channel.post(SessionMessage::ResponseSession { session_id, user });
    }
}

/// Per-tab session lifecycle: bootstrap from local storage or a sibling tab,
/// answer sibling requests, and propagate logout.
pub struct SessionManager {
    shared: Arc<SessionShared>,
    request_timeout: Duration,
    responder: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_key", &self.shared.session_key.raw())
            .field("has_channel", &self.shared.channel.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        config: &SessionConfig,
        local: Arc<dyn LocalStore>,
        users: Arc<UserStore>,
        authority: Arc<dyn SessionAuthority>,
        channel: Option<Arc<dyn SessionChannel>>,
    ) -> Result<Self, SessionError> {
        let session_key = KvKey::new(KeyNamespace::Session, config.session_key.clone())?;
        Ok(Self {
            shared: Arc::new(SessionShared {
                local,
                session_key,
                users,
                authority,
                channel,
            }),
            request_timeout: config.request_timeout(),
            responder: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> Result<Option<SessionId>, SessionError> {
        self.shared.session_id()
    }

    /// Stores the tab's session id and makes sure the responder is running.
    pub fn set_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.ensure_responder();
        self.shared
            .local
            .set(&self.shared.session_key, session_id.as_str())?;
        Ok(())
    }

    pub fn clear_session(&self) -> Result<(), SessionError> {
        self.shared.clear_session()
    }

    pub fn is_responding(&self) -> bool {
        self.responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Attaches the sibling-request responder. Idempotent; a no-op without a
    /// channel or outside a tokio runtime.
    pub fn ensure_responder(&self) {
        let Some(channel) = &self.shared.channel else {
            return;
        };
        let mut responder = self.responder.lock().unwrap_or_else(PoisonError::into_inner);
        if responder.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; session responder not attached");
            return;
        };

        let mut subscription = channel.subscribe();
        let shared = Arc::clone(&self.shared);
        *responder = Some(runtime.spawn(async move {
            while let Some(message) = subscription.recv().await {
                shared.handle(message).await;
            }
        }));
        tracing::debug!("session responder attached");
    }

    /// Restores this tab's user, from its own session id or from a sibling.
    ///
    /// Returns `None` when nobody answers within the request timeout, when
    /// no channel is configured, or when the local session id is stale.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Option<User> {
        self.ensure_responder();

        match self.shared.session_id() {
            Ok(Some(session_id)) => {
                return match self.shared.authority.resolve(&session_id).await {
                    Ok(user) => Some(user),
                    Err(e) => {
                        tracing::info!(error = %e, "stored session rejected");
                        if let Err(e) = self.shared.clear_session() {
                            tracing::warn!(error = %e, "failed to clear session id");
                        }
                        None
                    }
                };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to read session id");
            }
        }

        let channel = self.shared.channel.as_ref()?;
        let mut subscription = channel.subscribe();
        channel.post(SessionMessage::RequestSession);

        let answer = tokio::time::timeout(self.request_timeout, async {
            while let Some(message) = subscription.recv().await {
                if let SessionMessage::ResponseSession { session_id, user } = message {
                    return Some((session_id, user));
                }
            }
            None
        })
        .await;

        match answer {
            Ok(Some((session_id, user))) => {
                if let Err(e) = self.set_session(&session_id) {
                    tracing::warn!(error = %e, "failed to store adopted session id");
                }
                tracing::info!("session adopted from sibling tab");
                Some(user)
            }
            Ok(None) => None,
            Err(_) => {
                tracing::debug!(timeout = ?self.request_timeout, "no sibling answered");
                None
            }
        }
    }

    pub fn broadcast_logout(&self) {
        if let Some(channel) = &self.shared.channel {
            channel.post(SessionMessage::Logout);
        }
    }

    /// Bootstraps and records the outcome in the user store.
    pub async fn initialize(&self) -> Option<User> {
        let user = self.bootstrap().await;
        match &user {
            Some(user) => {
                self.shared.users.set_user(user.clone());
            }
            None => {
                self.shared.users.clear_user();
            }
        }
        self.shared.users.set_initialized(true);
        user
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<User, SessionError> {
        let user = self.shared.authority.login(username, password).await?;
        let session_id = self.shared.authority.issue_session(&user);
        self.set_session(&session_id)?;
        self.shared.users.set_user(user.clone());
        self.shared.users.set_initialized(true);
        tracing::info!(user_id = %user.id, "logged in");
        Ok(user)
    }

    /// Swaps the stored session id for a freshly issued one. A rejected id is
    /// cleared along with the user.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<User, SessionError> {
        let session_id = self.shared.session_id()?.ok_or(SessionError::NotFound)?;
        match self.shared.authority.refresh(&session_id).await {
            Ok((renewed, user)) => {
                self.set_session(&renewed)?;
                self.shared.users.set_user(user.clone());
                tracing::debug!(user_id = %user.id, "session id renewed");
                Ok(user)
            }
            Err(e) => {
                tracing::info!(error = %e, "session refresh rejected");
                self.shared.clear_session()?;
                self.shared.users.clear_user();
                Err(e)
            }
        }
    }

    /// Ends the session here and in every sibling tab. Local state is cleared
    /// even if the authority call fails.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), SessionError> {
        let session_id = self.shared.session_id().ok().flatten();
        if let Err(e) = self.shared.authority.logout(session_id.as_ref()).await {
            tracing::warn!(error = %e, "authority logout failed");
        }
        let cleared = self.shared.clear_session();
        self.shared.users.clear_user();
        self.shared.users.set_initialized(true);
        self.broadcast_logout();
        tracing::info!("logged out");
        cleared
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let responder = self.responder.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = responder.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::MemoryStore;
    use crate::session::authority::FixtureAuthority;
    use crate::session::channel::BroadcastHub;

    fn manager(channel: Option<Arc<dyn SessionChannel>>) -> SessionManager {
        let local: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let users = Arc::new(UserStore::new(local.clone()).unwrap());
        SessionManager::new(
            &SessionConfig::default(),
            local,
            users,
            Arc::new(FixtureAuthority::default()),
            channel,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_without_channel_is_none() {
        let tab = manager(None);
        assert_eq!(tab.bootstrap().await, None);
        assert!(!tab.is_responding());
    }

    #[tokio::test]
    async fn test_bootstrap_from_own_session() {
        let tab = manager(None);
        let user = tab
            .login("admin", &SecretString::new("password".into()))
            .await
            .unwrap();
        assert_eq!(tab.bootstrap().await, Some(user));
    }

    #[tokio::test]
    async fn test_stale_session_is_cleared() {
        let tab = manager(None);
        tab.set_session(&SessionId::new("demo-session:ghost:1")).unwrap();
        assert_eq!(tab.bootstrap().await, None);
        assert_eq!(tab.session_id().unwrap(), None);
    }

    #[tokio::test]
    async fn test_responder_attached_once() {
        let hub = BroadcastHub::new();
        let tab = manager(Some(Arc::new(hub.connect("auth-session"))));
        tab.ensure_responder();
        tab.ensure_responder();
        assert!(tab.is_responding());
    }

    #[tokio::test]
    async fn test_refresh_session_renews_id() {
        let tab = manager(None);
        let user = tab
            .login("user", &SecretString::new("password".into()))
            .await
            .unwrap();
        let before = tab.session_id().unwrap().unwrap();

        assert_eq!(tab.refresh_session().await.unwrap(), user);

        let after = tab.session_id().unwrap().unwrap();
        assert_ne!(after, before);
        assert_eq!(tab.bootstrap().await, Some(user));
    }

    #[tokio::test]
    async fn test_refresh_session_clears_expired_id() {
        let tab = manager(None);
        assert!(matches!(
            tab.refresh_session().await,
            Err(SessionError::NotFound)
        ));

        tab.set_session(&SessionId::new("demo-session:ghost:1")).unwrap();
        assert!(matches!(
            tab.refresh_session().await,
            Err(SessionError::Expired)
        ));
        assert_eq!(tab.session_id().unwrap(), None);
        assert_eq!(tab.shared.users.user(), None);
    }

    #[tokio::test]
    async fn test_login_failure_leaves_state() {
        let tab = manager(None);
        let err = tab
            .login("admin", &SecretString::new("wrong".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidCredentials));
        assert_eq!(tab.session_id().unwrap(), None);
    }
}
