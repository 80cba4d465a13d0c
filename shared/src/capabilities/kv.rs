use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 5 * 1024 * 1024;
pub const MAX_PREFIX_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {} bytes", MAX_KEY_LENGTH),
            });
        }

        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be only whitespace".to_string(),
            });
        }

        for c in key.chars() {
            if c.is_control() {
                return Err(KvError::InvalidKey {
                    key: key.escape_default().to_string(),
                    reason: "key contains control characters".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Page,
    Auth,
    Session,
    User,
    Custom(String),
}

impl KeyNamespace {
    pub fn prefix(&self) -> &str {
        match self {
            KeyNamespace::Page => "page",
            KeyNamespace::Auth => "auth",
            KeyNamespace::Session => "session",
            KeyNamespace::User => "user",
            KeyNamespace::Custom(s) => s.as_str(),
        }
    }

    pub fn custom(prefix: impl Into<String>) -> Result<Self, KvError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: "custom namespace cannot be empty".to_string(),
            });
        }
        if prefix.len() > MAX_PREFIX_LENGTH {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: format!(
                    "custom namespace exceeds maximum length of {} bytes",
                    MAX_PREFIX_LENGTH
                ),
            });
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: "custom namespace contains invalid characters".to_string(),
            });
        }
        Ok(KeyNamespace::Custom(prefix))
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?}, retryable: {retryable})")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String, key: Option<String> },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_retryable();
        Self::Storage {
            code,
            message: message.into(),
            retryable,
        }
    }

    fn poisoned() -> Self {
        Self::storage(StorageErrorCode::Locked, "store lock poisoned")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    ConnectionFailed,
    Corrupted,
    QuotaExceeded,
    Busy,
    Locked,
    IoError,
}

impl StorageErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageErrorCode::ConnectionFailed | StorageErrorCode::Busy | StorageErrorCode::Locked
        )
    }
}

// ============================================================================
// Local Store Trait and Backends
// ============================================================================

/// Synchronous string key-value store, the shape of browser `localStorage`.
///
/// Writes must be visible to the next `get` on return; callers rely on that
/// to keep persisted snapshots in lockstep with in-memory state.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError>;
    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError>;
    /// Returns whether an entry existed.
    fn remove(&self, key: &KvKey) -> Result<bool, KvError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a raw value, bypassing size checks. Useful to seed corrupt data.
    pub fn insert_raw(&self, raw_key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(raw_key.into(), value.into());
        }
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        let entries = self.entries.lock().map_err(|_| KvError::poisoned())?;
        Ok(entries.get(&key.raw()).cloned())
    }

    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
        check_value_size(value)?;
        let mut entries = self.entries.lock().map_err(|_| KvError::poisoned())?;
        entries.insert(key.raw(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &KvKey) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().map_err(|_| KvError::poisoned())?;
        Ok(entries.remove(&key.raw()).is_some())
    }
}

fn check_value_size(value: &str) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// SQLite-backed local store for native shells.
#[cfg(not(target_arch = "wasm32"))]
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

#[cfg(not(target_arch = "wasm32"))]
impl SqliteStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, KvError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| KvError::storage(StorageErrorCode::ConnectionFailed, e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, KvError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| KvError::storage(StorageErrorCode::ConnectionFailed, e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, KvError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS local_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(sqlite_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn sqlite_error(e: rusqlite::Error) -> KvError {
    let code = match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            rusqlite::ErrorCode::DatabaseBusy => StorageErrorCode::Busy,
            rusqlite::ErrorCode::DatabaseLocked => StorageErrorCode::Locked,
            rusqlite::ErrorCode::DatabaseCorrupt => StorageErrorCode::Corrupted,
            rusqlite::ErrorCode::DiskFull => StorageErrorCode::QuotaExceeded,
            _ => StorageErrorCode::IoError,
        },
        _ => StorageErrorCode::Unknown,
    };
    KvError::storage(code, e.to_string())
}

#[cfg(not(target_arch = "wasm32"))]
impl LocalStore for SqliteStore {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        use rusqlite::OptionalExtension;

        let conn = self.conn.lock().map_err(|_| KvError::poisoned())?;
        conn.query_row(
            "SELECT value FROM local_store WHERE key = ?1",
            rusqlite::params![key.raw()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(sqlite_error)
    }

    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
        check_value_size(value)?;
        let conn = self.conn.lock().map_err(|_| KvError::poisoned())?;
        conn.execute(
            r#"
            INSERT INTO local_store (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            rusqlite::params![key.raw(), value],
        )
        .map_err(sqlite_error)?;
        Ok(())
    }

    fn remove(&self, key: &KvKey) -> Result<bool, KvError> {
        let conn = self.conn.lock().map_err(|_| KvError::poisoned())?;
        let removed = conn
            .execute(
                "DELETE FROM local_store WHERE key = ?1",
                rusqlite::params![key.raw()],
            )
            .map_err(sqlite_error)?;
        Ok(removed > 0)
    }
}

// ============================================================================
// Typed JSON Slot
// ============================================================================

/// One JSON-serialized value of type `T` under a fixed key.
pub struct JsonSlot<T> {
    key: KvKey,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonSlot<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for JsonSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSlot").field("key", &self.key.raw()).finish()
    }
}

impl<T> JsonSlot<T> {
    pub fn key(&self) -> &KvKey {
        &self.key
    }
}

impl<T: Serialize + DeserializeOwned> JsonSlot<T> {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        Ok(Self {
            key: KvKey::new(namespace, key)?,
            _phantom: PhantomData,
        })
    }

    /// `Ok(None)` when absent, `Err(Serialization)` when present but malformed.
    pub fn load(&self, store: &dyn LocalStore) -> Result<Option<T>, KvError> {
        match store.get(&self.key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| KvError::Serialization {
                    message: e.to_string(),
                    key: Some(self.key.raw()),
                }),
            None => Ok(None),
        }
    }

    pub fn save(&self, store: &dyn LocalStore, value: &T) -> Result<(), KvError> {
        let raw = serde_json::to_string(value).map_err(|e| KvError::Serialization {
            message: e.to_string(),
            key: Some(self.key.raw()),
        })?;
        store.set(&self.key, &raw)
    }

    pub fn clear(&self, store: &dyn LocalStore) -> Result<bool, KvError> {
        store.remove(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation_empty() {
        let result = KvKey::new(KeyNamespace::Page, "");
        assert!(matches!(result, Err(KvError::InvalidKey { .. })));
    }

    #[test]
    fn test_key_validation_whitespace() {
        assert!(KvKey::new(KeyNamespace::Page, "   ").is_err());
    }

    #[test]
    fn test_key_validation_control_chars() {
        assert!(KvKey::new(KeyNamespace::Page, "key\x01value").is_err());
        assert!(KvKey::new(KeyNamespace::Page, "key\0value").is_err());
    }

    #[test]
    fn test_key_validation_too_long() {
        let long_key = "a".repeat(MAX_KEY_LENGTH + 1);
        assert!(KvKey::new(KeyNamespace::Page, long_key).is_err());
    }

    #[test]
    fn test_key_namespace_prefix() {
        let key = KvKey::new(KeyNamespace::Page, "demo-data-table-state").unwrap();
        assert_eq!(key.raw(), "page:demo-data-table-state");
    }

    #[test]
    fn test_custom_namespace() {
        assert_eq!(KeyNamespace::custom("devtools").unwrap().prefix(), "devtools");
        assert!(KeyNamespace::custom("").is_err());
        assert!(KeyNamespace::custom("bad namespace!").is_err());
    }

    #[test]
    fn test_memory_store_roundtrip_and_remove() {
        let store = MemoryStore::new();
        let key = KvKey::new(KeyNamespace::Auth, "accessToken").unwrap();

        assert_eq!(store.get(&key).unwrap(), None);
        store.set(&key, "abc").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("abc"));
        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_value_size_limit() {
        let store = MemoryStore::new();
        let key = KvKey::new(KeyNamespace::Page, "big").unwrap();
        let result = store.set(&key, &"x".repeat(MAX_VALUE_SIZE + 1));
        assert!(matches!(result, Err(KvError::ValueTooLarge { .. })));
    }

    #[test]
    fn test_json_slot_malformed_is_serialization_error() {
        let store = MemoryStore::new();
        let slot: JsonSlot<Vec<u32>> = JsonSlot::new(KeyNamespace::Page, "numbers").unwrap();

        store.insert_raw("page:numbers", "{not json");
        assert!(matches!(
            slot.load(&store),
            Err(KvError::Serialization { .. })
        ));

        slot.save(&store, &vec![1, 2, 3]).unwrap();
        assert_eq!(slot.load(&store).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");
        let key = KvKey::new(KeyNamespace::Session, "session-id").unwrap();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(&key, "demo-session:1:abc").unwrap();
            store.set(&key, "demo-session:1:def").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("demo-session:1:def"));
        assert!(store.remove(&key).unwrap());
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(KvError::storage(StorageErrorCode::Busy, "busy").is_retryable());
        assert!(!KvError::storage(StorageErrorCode::Corrupted, "bad").is_retryable());
        assert!(!KvError::Serialization {
            message: "x".into(),
            key: None
        }
        .is_retryable());
    }
}
