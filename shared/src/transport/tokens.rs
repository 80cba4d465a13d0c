use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::capabilities::{KeyNamespace, KvError, KvKey, LocalStore};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Tokens returned by the refresh endpoint. The refresh token is only rotated
/// when the server sends a new one.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
}

/// Credential slots in the local store. Values are stored as raw strings.
pub struct TokenStore {
    local: Arc<dyn LocalStore>,
    access_key: KvKey,
    refresh_key: KvKey,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("access_key", &self.access_key.raw())
            .field("refresh_key", &self.refresh_key.raw())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    pub fn new(local: Arc<dyn LocalStore>) -> Result<Self, KvError> {
        Ok(Self {
            local,
            access_key: KvKey::new(KeyNamespace::Auth, ACCESS_TOKEN_KEY)?,
            refresh_key: KvKey::new(KeyNamespace::Auth, REFRESH_TOKEN_KEY)?,
        })
    }

    pub fn access_token(&self) -> Result<Option<SecretString>, KvError> {
        self.read(&self.access_key)
    }

    pub fn refresh_token(&self) -> Result<Option<SecretString>, KvError> {
        self.read(&self.refresh_key)
    }

    pub fn set_access_token(&self, token: &SecretString) -> Result<(), KvError> {
        self.local.set(&self.access_key, token.expose_secret())
    }

    pub fn set_refresh_token(&self, token: &SecretString) -> Result<(), KvError> {
        self.local.set(&self.refresh_key, token.expose_secret())
    }

    /// Stores the access token, and the refresh token only if one was issued.
    pub fn store_pair(&self, pair: &TokenPair) -> Result<(), KvError> {
        self.set_access_token(&pair.access_token)?;
        if let Some(refresh) = &pair.refresh_token {
            self.set_refresh_token(refresh)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), KvError> {
        self.local.remove(&self.access_key)?;
        self.local.remove(&self.refresh_key)?;
        Ok(())
    }

    fn read(&self, key: &KvKey) -> Result<Option<SecretString>, KvError> {
        Ok(self
            .local
            .get(key)?
            .filter(|token| !token.is_empty())
            .map(SecretString::new))
    }
}
