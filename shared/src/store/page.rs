use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use super::persist::PersistedSlot;
use super::state::{
    reduce, FilterKey, PageAction, PagePatch, PageQueryState, PageRequest, PageResponse,
};
use crate::capabilities::{KeyNamespace, KvError, LocalStore};
use crate::change::{has_changed, search_comparator, ChangeOptions};

pub const DEFAULT_PAGE_RESET_VALUE: u32 = 1;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePageOptions {
    /// Stores sharing a key overwrite each other's persisted state.
    pub persist_key: String,
    pub initial_state: PagePatch,
    pub reset_store_partial: PagePatch,
    pub page_reset_value: u32,
}

impl TablePageOptions {
    pub fn new(persist_key: impl Into<String>) -> Self {
        Self {
            persist_key: persist_key.into(),
            initial_state: PagePatch::default(),
            reset_store_partial: PagePatch::default(),
            page_reset_value: DEFAULT_PAGE_RESET_VALUE,
        }
    }

    #[must_use]
    pub fn with_initial_state(mut self, initial_state: PagePatch) -> Self {
        self.initial_state = initial_state;
        self
    }

    #[must_use]
    pub fn with_reset_store_partial(mut self, partial: PagePatch) -> Self {
        self.reset_store_partial = partial;
        self
    }

    #[must_use]
    pub fn with_page_reset_value(mut self, value: u32) -> Self {
        self.page_reset_value = value.max(1);
        self
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug)]
struct PageData<R> {
    state: PageQueryState,
    rows: Vec<R>,
    total_elements: u64,
    total_pages: u32,
}

impl<R> PageData<R> {
    fn clear_rows(&mut self) {
        self.rows.clear();
        self.total_elements = 0;
        self.total_pages = 0;
    }
}

/// Per-page table state with write-through persistence.
///
/// Every committed change is persisted and published before the mutating call
/// returns. Rows are a volatile cache and never persisted.
#[derive(Debug)]
pub struct TablePageStore<R> {
    options: TablePageOptions,
    initial: PageQueryState,
    data: RwLock<PageData<R>>,
    persisted: PersistedSlot<PageQueryState>,
    changes: watch::Sender<PageQueryState>,
}

impl<R: Clone + Send + Sync + 'static> TablePageStore<R> {
    pub fn new(
        options: TablePageOptions,
        local: Arc<dyn LocalStore>,
        default_page_size: u32,
    ) -> Result<Self, KvError> {
        let persisted: PersistedSlot<PageQueryState> =
            PersistedSlot::new(local, KeyNamespace::Page, options.persist_key.clone())?;
        let defaults = PageQueryState::with_page_size(default_page_size);
        let mut initial = defaults.patched(&options.initial_state);
        if !initial.is_valid() {
            tracing::warn!(
                key = %options.persist_key,
                page = initial.page,
                size = initial.size,
                "initial state out of range; clamping"
            );
            initial.page = initial.page.max(1);
            if initial.size == 0 {
                initial.size = defaults.size;
            }
        }

        let state = match persisted.rehydrate() {
            Some(state) if state.is_valid() => state,
            Some(state) => {
                tracing::warn!(
                    key = %persisted.raw_key(),
                    page = state.page,
                    size = state.size,
                    "persisted page state out of range; using defaults"
                );
                initial.clone()
            }
            None => initial.clone(),
        };

        let (changes, _) = watch::channel(state.clone());

        Ok(Self {
            options,
            initial,
            data: RwLock::new(PageData {
                state,
                rows: Vec::new(),
                total_elements: 0,
                total_pages: 0,
            }),
            persisted,
            changes,
        })
    }

    pub fn persist_key(&self) -> &str {
        &self.options.persist_key
    }

    pub fn state(&self) -> PageQueryState {
        self.read().state.clone()
    }

    pub fn initial_state(&self) -> &PageQueryState {
        &self.initial
    }

    pub fn rows(&self) -> Vec<R> {
        self.read().rows.clone()
    }

    pub fn total_elements(&self) -> u64 {
        self.read().total_elements
    }

    pub fn total_pages(&self) -> u32 {
        self.read().total_pages
    }

    pub fn subscribe(&self) -> watch::Receiver<PageQueryState> {
        self.changes.subscribe()
    }

    pub fn page_request(&self) -> PageRequest {
        self.read().state.page_request()
    }

    pub fn set_search(&self, search: impl Into<String>) -> bool {
        self.dispatch(PageAction::SetSearch(search.into()))
    }

    pub fn set_filter_key(&self, filter_key: FilterKey) -> bool {
        self.dispatch(PageAction::SetFilterKey(filter_key))
    }

    /// Same key toggles the direction; a new key starts ascending.
    pub fn set_sort(&self, key: impl Into<String>) -> bool {
        self.dispatch(PageAction::SetSort(key.into()))
    }

    pub fn set_page(&self, page: u32) -> bool {
        self.dispatch(PageAction::SetPage(page))
    }

    pub fn set_size(&self, size: u32) -> bool {
        if size == 0 {
            tracing::warn!(key = %self.options.persist_key, "ignoring page size 0");
        }
        self.dispatch(PageAction::SetSize(size))
    }

    pub fn dispatch(&self, action: PageAction) -> bool {
        let mut data = self.write();
        let patch = reduce(&data.state, action, self.options.page_reset_value);
        self.commit(&mut data, &patch)
    }

    /// Back to the initial state, but only if that is a real difference.
    /// Search strings compare by canonical form. Rows are always dropped.
    pub fn reset(&self) -> bool {
        let mut data = self.write();
        data.clear_rows();

        let options = ChangeOptions::new().comparator("search", search_comparator());
        if !has_changed(&data.state, &self.initial, &options) {
            return false;
        }

        data.state = self.initial.clone();
        self.publish(&data.state);
        true
    }

    /// Drops cached rows and applies the configured soft-reset fields.
    pub fn reset_store(&self) -> bool {
        let mut data = self.write();
        data.clear_rows();
        let partial = self.options.reset_store_partial.clone();
        self.commit(&mut data, &partial)
    }

    pub fn set_rows(&self, rows: Vec<R>) {
        self.write().rows = rows;
    }

    pub fn apply_page(&self, response: PageResponse<R>) {
        let mut data = self.write();
        data.rows = response.content;
        data.total_elements = response.total_elements;
        data.total_pages = response.total_pages;
    }

    fn commit(&self, data: &mut PageData<R>, patch: &PagePatch) -> bool {
        if !data.state.differs_from(patch) {
            return false;
        }
        data.state = data.state.patched(patch);
        self.publish(&data.state);
        true
    }

    fn publish(&self, state: &PageQueryState) {
        self.persisted.write(state);
        self.changes.send_replace(state.clone());
        tracing::debug!(
            key = %self.options.persist_key,
            page = state.page,
            size = state.size,
            "page state committed"
        );
    }

    fn read(&self) -> RwLockReadGuard<'_, PageData<R>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PageData<R>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{KvKey, MemoryStore};
    use crate::store::state::SortDirection;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    impl LocalStore for CountingStore {
        fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
            self.inner.get(key)
        }

        fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }

        fn remove(&self, key: &KvKey) -> Result<bool, KvError> {
            self.inner.remove(key)
        }
    }

    fn store_with(
        local: Arc<dyn LocalStore>,
        options: TablePageOptions,
    ) -> TablePageStore<u32> {
        TablePageStore::new(options, local, 10).unwrap()
    }

    fn persisted(local: &dyn LocalStore, key: &str) -> Option<PageQueryState> {
        let key = KvKey::new(KeyNamespace::Page, key).unwrap();
        local
            .get(&key)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[test]
    fn test_search_resets_page_and_persists() {
        let local = Arc::new(MemoryStore::new());
        let store = store_with(local.clone(), TablePageOptions::new("users"));
        store.set_size(10);
        store.set_page(3);

        assert!(store.set_search("abc"));
        let state = store.state();
        assert_eq!(state.search, "abc");
        assert_eq!(state.page, 1);
        assert_eq!(state.size, 10);
        assert_eq!(persisted(local.as_ref(), "users"), Some(state));
    }

    #[test]
    fn test_unchanged_set_is_noop() {
        let local = Arc::new(CountingStore::default());
        let store = store_with(local.clone(), TablePageOptions::new("users"));
        assert!(!store.set_page(1));
        assert!(!store.set_size(10));
        assert_eq!(local.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_size_leaves_page() {
        let store = store_with(Arc::new(MemoryStore::new()), TablePageOptions::new("users"));
        store.set_page(4);
        assert!(store.set_size(25));
        assert_eq!(store.state().page, 4);
        assert!(!store.set_size(0));
        assert_eq!(store.state().size, 25);
    }

    #[test]
    fn test_sort_toggle() {
        let store = store_with(Arc::new(MemoryStore::new()), TablePageOptions::new("users"));
        store.set_sort("name");
        assert_eq!(store.state().sort_direction, SortDirection::Asc);
        store.set_sort("name");
        assert_eq!(store.state().sort_direction, SortDirection::Desc);
        store.set_sort("email");
        let state = store.state();
        assert_eq!(state.sort_key.as_deref(), Some("email"));
        assert_eq!(state.sort_direction, SortDirection::Asc);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let local = Arc::new(CountingStore::default());
        let store = store_with(local.clone(), TablePageOptions::new("users"));
        store.set_page(5);
        let writes = local.writes.load(Ordering::SeqCst);

        assert!(store.reset());
        assert_eq!(local.writes.load(Ordering::SeqCst), writes + 1);
        assert!(!store.reset());
        assert_eq!(local.writes.load(Ordering::SeqCst), writes + 1);
        assert_eq!(store.state(), PageQueryState::default());
    }

    #[test]
    fn test_reset_treats_equivalent_search_as_clean() {
        let local = Arc::new(CountingStore::default());
        let store = store_with(
            local.clone(),
            TablePageOptions::new("users").with_initial_state(PagePatch::new().search("a=1&b=2")),
        );
        store.set_search("b=2&a=1");
        store.set_page(1);
        let writes = local.writes.load(Ordering::SeqCst);
        assert!(!store.reset());
        assert_eq!(local.writes.load(Ordering::SeqCst), writes);
    }

    #[test]
    fn test_reset_drops_rows() {
        let store = store_with(Arc::new(MemoryStore::new()), TablePageOptions::new("users"));
        store.set_rows(vec![1, 2, 3]);
        assert!(!store.reset());
        assert!(store.rows().is_empty());
    }

    #[test]
    fn test_reset_store_applies_partial() {
        let store = store_with(
            Arc::new(MemoryStore::new()),
            TablePageOptions::new("users").with_reset_store_partial(PagePatch::new().page(1)),
        );
        store.set_search("kim");
        store.set_page(3);
        store.apply_page(PageResponse {
            content: vec![7, 8],
            total_elements: 12,
            total_pages: 2,
            page: 3,
            size: 10,
        });
        assert_eq!(store.total_elements(), 12);

        assert!(store.reset_store());
        let state = store.state();
        assert_eq!(state.page, 1);
        assert_eq!(state.search, "kim");
        assert!(store.rows().is_empty());
        assert_eq!(store.total_pages(), 0);
    }

    #[test]
    fn test_rehydrates_persisted_state() {
        let local = Arc::new(MemoryStore::new());
        {
            let store = store_with(local.clone(), TablePageOptions::new("users"));
            store.set_search("kim");
            store.set_page(2);
        }
        let store = store_with(local, TablePageOptions::new("users"));
        assert_eq!(store.state().search, "kim");
        assert_eq!(store.state().page, 2);
    }

    #[test]
    fn test_malformed_persisted_state_falls_back() {
        let local = Arc::new(MemoryStore::new());
        local.insert_raw("page:users", "{\"search\":42");
        let store = store_with(local.clone(), TablePageOptions::new("users"));
        assert_eq!(store.state(), PageQueryState::default());

        local.insert_raw(
            "page:users",
            r#"{"search":"","filterKey":"all","sortKey":null,"sortDirection":"asc","page":0,"size":10}"#,
        );
        let store = store_with(local, TablePageOptions::new("users"));
        assert_eq!(store.state().page, 1);
    }

    #[test]
    fn test_initial_state_override() {
        let store = store_with(
            Arc::new(MemoryStore::new()),
            TablePageOptions::new("users").with_initial_state(PagePatch::new().size(50)),
        );
        assert_eq!(store.state().size, 50);
        assert_eq!(store.initial_state().size, 50);
    }

    #[test]
    fn test_out_of_range_initial_state_is_clamped() {
        let local = Arc::new(MemoryStore::new());
        let store = store_with(
            local.clone(),
            TablePageOptions::new("users").with_initial_state(PagePatch::new().page(0).size(0)),
        );
        assert_eq!(store.initial_state().page, 1);
        assert_eq!(store.initial_state().size, 10);
        assert!(store.initial_state().is_valid());

        store.set_page(3);
        assert!(store.reset());
        let written = persisted(local.as_ref(), "users").unwrap();
        assert!(written.is_valid());
        assert_eq!(written, *store.initial_state());
    }

    #[test]
    fn test_custom_page_reset_value() {
        let store = store_with(
            Arc::new(MemoryStore::new()),
            TablePageOptions::new("users").with_page_reset_value(2),
        );
        store.set_page(7);
        store.set_filter_key(FilterKey::field("email"));
        assert_eq!(store.state().page, 2);
    }

    #[test]
    fn test_subscribe_observes_commits() {
        let store = store_with(Arc::new(MemoryStore::new()), TablePageOptions::new("users"));
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());
        store.set_page(2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().page, 2);
        store.set_page(2);
        assert!(!rx.has_changed().unwrap());
    }

    fn action_strategy() -> impl Strategy<Value = PageAction> {
        prop_oneof![
            "[a-c ]{0,4}".prop_map(PageAction::SetSearch),
            prop_oneof![Just(FilterKey::All), Just(FilterKey::field("name"))]
                .prop_map(PageAction::SetFilterKey),
            prop_oneof![Just("name".to_string()), Just("email".to_string())]
                .prop_map(PageAction::SetSort),
            (0u32..20).prop_map(PageAction::SetPage),
            (0u32..100).prop_map(PageAction::SetSize),
        ]
    }

    proptest! {
        #[test]
        fn page_state_invariants_hold(actions in prop::collection::vec(action_strategy(), 1..40)) {
            let local = Arc::new(MemoryStore::new());
            let store = store_with(local.clone(), TablePageOptions::new("prop"));

            for action in actions {
                let before = store.state();
                store.dispatch(action.clone());
                let after = store.state();

                prop_assert!(after.page >= 1);
                prop_assert!(after.size > 0);

                match action {
                    PageAction::SetSearch(_) | PageAction::SetFilterKey(_) | PageAction::SetSort(_) => {
                        prop_assert_eq!(after.page, DEFAULT_PAGE_RESET_VALUE);
                        prop_assert_eq!(after.size, before.size);
                    }
                    PageAction::SetPage(_) => {
                        prop_assert_eq!(
                            PageQueryState { page: before.page, ..after.clone() },
                            before.clone()
                        );
                    }
                    PageAction::SetSize(_) => {
                        prop_assert_eq!(
                            PageQueryState { size: before.size, ..after.clone() },
                            before.clone()
                        );
                    }
                }

                if after != before {
                    prop_assert_eq!(persisted(local.as_ref(), "prop"), Some(after));
                }
            }
        }

        #[test]
        fn reset_twice_never_writes_again(actions in prop::collection::vec(action_strategy(), 0..20)) {
            let local = Arc::new(CountingStore::default());
            let store = store_with(local.clone(), TablePageOptions::new("prop"));
            for action in actions {
                store.dispatch(action);
            }
            store.reset();
            let writes = local.writes.load(Ordering::SeqCst);
            prop_assert!(!store.reset());
            prop_assert_eq!(local.writes.load(Ordering::SeqCst), writes);
        }
    }
}
