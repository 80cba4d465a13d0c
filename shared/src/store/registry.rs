use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::page::{TablePageOptions, TablePageStore};
use crate::capabilities::LocalStore;
use crate::{AppError, AppResult, ErrorKind};

struct Entry {
    row_type: &'static str,
    store: Arc<dyn Any + Send + Sync>,
}

/// Lazily created page stores, one per persist key, alive for the whole
/// application. Stores are reset, never destroyed.
pub struct StoreRegistry {
    local: Arc<dyn LocalStore>,
    default_page_size: u32,
    stores: Mutex<HashMap<String, Entry>>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("StoreRegistry")
            .field("default_page_size", &self.default_page_size)
            .field("stores", &stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StoreRegistry {
    pub fn new(local: Arc<dyn LocalStore>, default_page_size: u32) -> Self {
        Self {
            local,
            default_page_size,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the store for `options.persist_key`, creating it on first use.
    /// Options only apply on creation; later calls get the existing store.
    pub fn page_store<R>(&self, options: TablePageOptions) -> AppResult<Arc<TablePageStore<R>>>
    where
        R: Clone + Send + Sync + 'static,
    {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = stores.get(&options.persist_key) {
            return Arc::clone(&entry.store)
                .downcast::<TablePageStore<R>>()
                .map_err(|_| {
                    AppError::new(
                        ErrorKind::InvalidState,
                        "page store already registered with another row type",
                    )
                    .with_context("persist_key", options.persist_key.clone())
                    .with_context("registered", entry.row_type)
                    .with_context("requested", type_name::<R>())
                });
        }

        let key = options.persist_key.clone();
        let store = Arc::new(TablePageStore::<R>::new(
            options,
            Arc::clone(&self.local),
            self.default_page_size,
        )?);
        tracing::debug!(persist_key = %key, row_type = type_name::<R>(), "page store created");

        stores.insert(
            key,
            Entry {
                row_type: type_name::<R>(),
                store: store.clone(),
            },
        );
        Ok(store)
    }

    pub fn contains(&self, persist_key: &str) -> bool {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(persist_key)
    }
}
