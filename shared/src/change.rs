use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::query::canonicalize_query;

/// Field equality. `None` means the field is absent from that snapshot.
pub type Comparator = Arc<dyn Fn(Option<&Value>, Option<&Value>) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct ChangeOptions {
    comparators: HashMap<String, Comparator>,
    include_keys: Option<Vec<String>>,
    exclude_keys: HashSet<String>,
}

impl ChangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn comparator(mut self, field: impl Into<String>, comparator: Comparator) -> Self {
        self.comparators.insert(field.into(), comparator);
        self
    }

    #[must_use]
    pub fn include<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn exclude<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

impl fmt::Debug for ChangeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeOptions")
            .field("comparators", &self.comparators.keys().collect::<Vec<_>>())
            .field("include_keys", &self.include_keys)
            .field("exclude_keys", &self.exclude_keys)
            .finish()
    }
}

/// Compares two string fields by their canonical query form.
pub fn search_comparator() -> Comparator {
    Arc::new(|a, b| match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => {
            canonicalize_query(a) == canonicalize_query(b)
        }
        (a, b) => a == b,
    })
}

/// Returns `true` as soon as one participating field differs.
///
/// Participating fields are `include_keys` if given, otherwise every key of
/// `defaults`, minus `exclude_keys`.
pub fn has_changed<S: Serialize>(state: &S, defaults: &S, options: &ChangeOptions) -> bool {
    let state = to_fields(state);
    let defaults = to_fields(defaults);

    let keys: Vec<&str> = match &options.include_keys {
        Some(keys) => keys.iter().map(String::as_str).collect(),
        None => defaults.keys().map(String::as_str).collect(),
    };

    keys.into_iter()
        .filter(|key| !options.exclude_keys.contains(*key))
        .any(|key| {
            let current = state.get(key);
            let default = defaults.get(key);
            let equal = match options.comparators.get(key) {
                Some(comparator) => comparator(current, default),
                None => current == default,
            };
            !equal
        })
}

fn to_fields<S: Serialize>(value: &S) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = Map::new();
            map.insert(String::new(), other);
            map
        }
        Err(e) => {
            tracing::warn!(error = %e, "snapshot is not serializable; treating as empty");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_snapshots_unchanged() {
        let defaults = json!({ "count": 0, "query": "" });
        assert!(!has_changed(&defaults, &defaults, &ChangeOptions::new()));
    }

    #[test]
    fn test_any_field_differs() {
        let defaults = json!({ "count": 0, "query": "" });
        let state = json!({ "count": 1, "query": "" });
        assert!(has_changed(&state, &defaults, &ChangeOptions::new()));
    }

    #[test]
    fn test_custom_comparator_applies() {
        let defaults = json!({ "count": 0, "query": "" });
        let state = json!({ "count": 0, "query": "   " });
        let options = ChangeOptions::new().comparator("query", search_comparator());
        assert!(!has_changed(&state, &defaults, &options));
        assert!(has_changed(&state, &defaults, &ChangeOptions::new()));
    }

    #[test]
    fn test_search_comparator_ignores_param_order() {
        let defaults = json!({ "search": "foo=1&bar=2" });
        let state = json!({ "search": "bar=2&foo=1" });
        let options = ChangeOptions::new().comparator("search", search_comparator());
        assert!(!has_changed(&state, &defaults, &options));
    }

    #[test]
    fn test_missing_field_is_a_change() {
        let defaults = json!({ "user": null, "isAuthenticated": false });
        let state = json!({ "isAuthenticated": false });
        assert!(has_changed(&state, &defaults, &ChangeOptions::new()));
    }

    #[test]
    fn test_include_and_exclude_keys() {
        let defaults = json!({ "data": [], "page": 1, "query": "" });
        let state = json!({ "data": [{ "id": 1 }], "page": 1, "query": "" });

        let options = ChangeOptions::new().exclude(["data"]);
        assert!(!has_changed(&state, &defaults, &options));

        let options = ChangeOptions::new().include(["page", "query"]);
        assert!(!has_changed(&state, &defaults, &options));

        let options = ChangeOptions::new().include(["data", "page"]).exclude(["page"]);
        assert!(has_changed(&state, &defaults, &options));
    }

    #[test]
    fn test_comparator_on_array_length() {
        let defaults = json!({ "data": [] });
        let state = json!({ "data": [{ "id": 1 }] });
        let by_len: Comparator = Arc::new(|a, b| {
            let len = |v: Option<&Value>| v.and_then(Value::as_array).map(Vec::len);
            len(a) == len(b)
        });
        let options = ChangeOptions::new().comparator("data", by_len);
        assert!(has_changed(&state, &defaults, &options));
    }
}
