use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterKey {
    #[default]
    All,
    Field(String),
}

impl FilterKey {
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == "all" {
            Self::All
        } else {
            Self::Field(name)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FilterKey::All => "all",
            FilterKey::Field(name) => name.as_str(),
        }
    }
}

impl From<String> for FilterKey {
    fn from(value: String) -> Self {
        Self::field(value)
    }
}

impl From<FilterKey> for String {
    fn from(value: FilterKey) -> Self {
        match value {
            FilterKey::All => "all".to_string(),
            FilterKey::Field(name) => name,
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub const fn toggle(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Query state of one table page. This is also exactly the persisted subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQueryState {
    pub search: String,
    pub filter_key: FilterKey,
    pub sort_key: Option<String>,
    pub sort_direction: SortDirection,
    pub page: u32,
    pub size: u32,
}

impl Default for PageQueryState {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl PageQueryState {
    pub fn with_page_size(size: u32) -> Self {
        Self {
            search: String::new(),
            filter_key: FilterKey::All,
            sort_key: None,
            sort_direction: SortDirection::Asc,
            page: 1,
            size: size.max(1),
        }
    }

    /// Rehydrated snapshots can carry anything; reject impossible positions.
    pub fn is_valid(&self) -> bool {
        self.page >= 1 && self.size > 0
    }

    /// "Set only if changed": true iff a field present in `patch` differs.
    pub fn differs_from(&self, patch: &PagePatch) -> bool {
        patch.search.as_ref().is_some_and(|v| *v != self.search)
            || patch.filter_key.as_ref().is_some_and(|v| *v != self.filter_key)
            || patch.sort_key.as_ref().is_some_and(|v| *v != self.sort_key)
            || patch.sort_direction.is_some_and(|v| v != self.sort_direction)
            || patch.page.is_some_and(|v| v != self.page)
            || patch.size.is_some_and(|v| v != self.size)
    }

    #[must_use]
    pub fn patched(&self, patch: &PagePatch) -> Self {
        let mut next = self.clone();
        if let Some(search) = &patch.search {
            next.search.clone_from(search);
        }
        if let Some(filter_key) = &patch.filter_key {
            next.filter_key = filter_key.clone();
        }
        if let Some(sort_key) = &patch.sort_key {
            next.sort_key.clone_from(sort_key);
        }
        if let Some(direction) = patch.sort_direction {
            next.sort_direction = direction;
        }
        if let Some(page) = patch.page {
            next.page = page;
        }
        if let Some(size) = patch.size {
            next.size = size;
        }
        next
    }

    /// Query parameters for the page's data fetch.
    pub fn page_request(&self) -> PageRequest {
        let search = self.search.trim();
        PageRequest {
            page: self.page,
            size: self.size,
            sort: self.sort_key.clone(),
            direction: self.sort_key.as_ref().map(|_| self.sort_direction),
            search: (!search.is_empty()).then(|| search.to_string()),
            filter_key: (!search.is_empty() && self.filter_key != FilterKey::All)
                .then(|| self.filter_key.clone()),
        }
    }
}

/// Partial update. `None` leaves the field untouched; for `sort_key`,
/// `Some(None)` clears the sort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagePatch {
    pub search: Option<String>,
    pub filter_key: Option<FilterKey>,
    pub sort_key: Option<Option<String>>,
    pub sort_direction: Option<SortDirection>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl PagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    #[must_use]
    pub fn filter_key(mut self, filter_key: FilterKey) -> Self {
        self.filter_key = Some(filter_key);
        self
    }

    #[must_use]
    pub fn sort(mut self, key: Option<String>, direction: SortDirection) -> Self {
        self.sort_key = Some(key);
        self.sort_direction = Some(direction);
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    SetSearch(String),
    SetFilterKey(FilterKey),
    SetSort(String),
    SetPage(u32),
    SetSize(u32),
}

/// Computes the patch an action produces against `state`.
///
/// Search, filter and sort changes produce a new result set, so they always
/// carry `page = page_reset_value`. Page and size touch only themselves.
pub fn reduce(state: &PageQueryState, action: PageAction, page_reset_value: u32) -> PagePatch {
    let reset_page = page_reset_value.max(1);
    match action {
        PageAction::SetSearch(search) => PagePatch::new().search(search).page(reset_page),
        PageAction::SetFilterKey(filter_key) => {
            PagePatch::new().filter_key(filter_key).page(reset_page)
        }
        PageAction::SetSort(key) => {
            let patch = if state.sort_key.as_deref() == Some(key.as_str()) {
                PagePatch {
                    sort_direction: Some(state.sort_direction.toggle()),
                    ..PagePatch::default()
                }
            } else {
                PagePatch::new().sort(Some(key), SortDirection::Asc)
            };
            patch.page(reset_page)
        }
        PageAction::SetPage(page) => PagePatch::new().page(page.max(1)),
        PageAction::SetSize(0) => PagePatch::new(),
        PageAction::SetSize(size) => PagePatch::new().size(size),
    }
}

/// Query parameters sent with a table data fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<SortDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_key: Option<FilterKey>,
}

impl PageRequest {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("size".to_string(), self.size.to_string()),
        ];
        if let Some(sort) = &self.sort {
            pairs.push(("sort".to_string(), sort.clone()));
        }
        if let Some(direction) = self.direction {
            pairs.push(("direction".to_string(), direction.as_str().to_string()));
        }
        if let Some(search) = &self.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        if let Some(filter_key) = &self.filter_key {
            pairs.push(("filterKey".to_string(), filter_key.to_string()));
        }
        pairs
    }
}

/// One page of server results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub page: u32,
    pub size: u32,
}
