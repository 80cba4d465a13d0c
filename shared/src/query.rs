use url::form_urlencoded;

/// Normalizes a search string so equivalent queries compare equal.
///
/// Accepts a bare query (`a=1&b=2`), one with a leading `?`, or a full URL.
/// Keys and values are trimmed, pairs with an empty key dropped, and the rest
/// sorted by key then value before re-encoding.
pub fn canonicalize_query(input: &str) -> String {
    let raw = input.trim();

    let query = if let Some(stripped) = raw.strip_prefix('?') {
        stripped
    } else if let Some((_, after)) = raw.split_once('?') {
        after
    } else {
        raw
    };

    if query.is_empty() {
        return String::new();
    }

    let mut entries: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect();

    entries.sort();

    entries
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_order_is_irrelevant() {
        assert_eq!(
            canonicalize_query("foo=1&bar=2"),
            canonicalize_query("bar=2&foo=1")
        );
    }

    #[test]
    fn test_blank_is_empty() {
        assert_eq!(canonicalize_query("  "), "");
        assert_eq!(canonicalize_query(""), "");
        assert_eq!(canonicalize_query("?"), "");
    }

    #[test]
    fn test_leading_question_mark_and_full_url() {
        assert_eq!(canonicalize_query("?b=2&a=1"), "a=1&b=2");
        assert_eq!(
            canonicalize_query("https://admin.example.com/users?role=admin&name=kim"),
            "name=kim&role=admin"
        );
    }

    #[test]
    fn test_trims_keys_and_values_and_drops_empty_keys() {
        assert_eq!(canonicalize_query(" a = 1 &=x&b=2"), "a=1&b=2");
    }

    #[test]
    fn test_same_key_sorted_by_value() {
        assert_eq!(canonicalize_query("tag=b&tag=a"), "tag=a&tag=b");
    }

    #[test]
    fn test_free_text_is_stable() {
        assert_eq!(canonicalize_query("  abc "), canonicalize_query("abc"));
        assert_ne!(canonicalize_query("abc"), canonicalize_query("abd"));
    }
}
