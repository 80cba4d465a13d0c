use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::capabilities::{JsonSlot, KeyNamespace, KvError, LocalStore};

/// Load and save failures are logged and swallowed; in-memory state stays
/// authoritative.
pub struct PersistedSlot<T> {
    slot: JsonSlot<T>,
    store: Arc<dyn LocalStore>,
}

impl<T> fmt::Debug for PersistedSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSlot")
            .field("key", &self.slot.key().raw())
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> PersistedSlot<T> {
    pub fn new(
        store: Arc<dyn LocalStore>,
        namespace: KeyNamespace,
        key: impl Into<String>,
    ) -> Result<Self, KvError> {
        Ok(Self {
            slot: JsonSlot::new(namespace, key)?,
            store,
        })
    }

    pub fn raw_key(&self) -> String {
        self.slot.key().raw()
    }

    /// Missing yields `None` quietly; malformed or unreadable yields `None`
    /// with a warning.
    pub fn rehydrate(&self) -> Option<T> {
        match self.slot.load(self.store.as_ref()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    key = %self.slot.key().raw(),
                    error = %e,
                    "discarding unreadable persisted state"
                );
                None
            }
        }
    }

    pub fn write(&self, value: &T) {
        if let Err(e) = self.slot.save(self.store.as_ref(), value) {
            tracing::warn!(
                key = %self.slot.key().raw(),
                error = %e,
                retryable = e.is_retryable(),
                "failed to persist state"
            );
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.slot.clear(self.store.as_ref()) {
            tracing::warn!(key = %self.slot.key().raw(), error = %e, "failed to clear persisted state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{KvKey, MemoryStore};

    #[test]
    fn test_rehydrate_missing_is_none() {
        let store = Arc::new(MemoryStore::new());
        let slot: PersistedSlot<Vec<u32>> =
            PersistedSlot::new(store, KeyNamespace::Page, "users").unwrap();
        assert_eq!(slot.rehydrate(), None);
    }

    #[test]
    fn test_rehydrate_malformed_is_none() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw("page:users", "{not json");
        let slot: PersistedSlot<Vec<u32>> =
            PersistedSlot::new(store, KeyNamespace::Page, "users").unwrap();
        assert_eq!(slot.rehydrate(), None);
    }

    #[test]
    fn test_write_then_rehydrate() {
        let store = Arc::new(MemoryStore::new());
        let slot: PersistedSlot<Vec<u32>> =
            PersistedSlot::new(store.clone(), KeyNamespace::Page, "users").unwrap();
        slot.write(&vec![1, 2, 3]);
        assert_eq!(slot.rehydrate(), Some(vec![1, 2, 3]));

        let key = KvKey::new(KeyNamespace::Page, "users").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("[1,2,3]"));

        slot.clear();
        assert_eq!(slot.rehydrate(), None);
    }

    #[test]
    fn test_debug_shows_key_only() {
        let store = Arc::new(MemoryStore::new());
        let slot: PersistedSlot<Vec<u32>> =
            PersistedSlot::new(store, KeyNamespace::Auth, "accessToken").unwrap();
        slot.write(&vec![42]);
        let debug = format!("{slot:?}");
        assert!(debug.contains("auth:accessToken"));
        assert!(!debug.contains("42"));
    }
}
