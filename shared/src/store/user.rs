use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

use super::persist::PersistedSlot;
use crate::capabilities::{KeyNamespace, KvError, LocalStore};
use crate::change::{has_changed, ChangeOptions};
use crate::model::{Role, User};

pub const USER_STATE_KEY: &str = "user-state";

/// Persisted subset of the user store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub user: Option<User>,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    /// Set once session bootstrap has settled. Never persisted.
    pub initialized: bool,
}

impl UserState {
    fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated,
        }
    }
}

/// Current user, shared by every page of one tab.
#[derive(Debug)]
pub struct UserStore {
    state: RwLock<UserState>,
    persisted: PersistedSlot<UserSnapshot>,
    changes: watch::Sender<UserState>,
}

impl UserStore {
    pub fn new(local: Arc<dyn LocalStore>) -> Result<Self, KvError> {
        let persisted: PersistedSlot<UserSnapshot> =
            PersistedSlot::new(local, KeyNamespace::User, USER_STATE_KEY)?;
        let snapshot = persisted.rehydrate().unwrap_or_default();
        let state = UserState {
            // An authenticated flag without a user cannot be trusted.
            is_authenticated: snapshot.is_authenticated && snapshot.user.is_some(),
            user: snapshot.user,
            initialized: false,
        };
        let (changes, _) = watch::channel(state.clone());
        Ok(Self {
            state: RwLock::new(state),
            persisted,
            changes,
        })
    }

    pub fn state(&self) -> UserState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).is_authenticated
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).initialized
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.user().is_some_and(|user| user.has_role(role))
    }

    pub fn subscribe(&self) -> watch::Receiver<UserState> {
        self.changes.subscribe()
    }

    pub fn set_user(&self, user: User) -> bool {
        self.update(|state| {
            state.user = Some(user);
            state.is_authenticated = true;
        })
    }

    pub fn clear_user(&self) -> bool {
        self.update(|state| {
            state.user = None;
            state.is_authenticated = false;
        })
    }

    pub fn set_initialized(&self, initialized: bool) -> bool {
        self.update(|state| state.initialized = initialized)
    }

    /// Clears the user only if the persisted subset is not already at its
    /// defaults.
    pub fn reset(&self) -> bool {
        let dirty = has_changed(
            &self.state().snapshot(),
            &UserSnapshot::default(),
            &ChangeOptions::new(),
        );
        if !dirty {
            return false;
        }
        self.clear_user()
    }

    fn update(&self, apply: impl FnOnce(&mut UserState)) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = state.clone();
        apply(&mut next);
        if next == *state {
            return false;
        }

        if next.snapshot() != state.snapshot() {
            self.persisted.write(&next.snapshot());
        }
        *state = next;
        self.changes.send_replace(state.clone());
        tracing::debug!(
            authenticated = state.is_authenticated,
            initialized = state.initialized,
            "user state committed"
        );
        true
    }
}
