//! URL composition and normalization.

use url::form_urlencoded;

use crate::query::QueryParams;

/// Build a request URL from its parts.
///
/// Each path segment is appended with a `/` separator, the structured query
/// comes first, then the ad-hoc query in insertion order with form-encoded
/// values. The result goes through [`normalize`].
pub fn build(
    root: &str,
    paths: &[String],
    query_params: Option<&QueryParams>,
    query: &[(String, String)],
) -> String {
    let mut url = String::from(root);
    for path in paths {
        url.push('/');
        url.push_str(path);
    }

    let mut separator = if url.contains('?') { '&' } else { '?' };
    if let Some(params) = query_params {
        let rendered = params.to_query_string();
        if !rendered.is_empty() {
            url.push(separator);
            url.push_str(&rendered);
            separator = '&';
        }
    }
    if !query.is_empty() {
        url.push(separator);
        let pairs: Vec<String> = query
            .iter()
            .map(|(key, value)| format!("{key}={}", encode(value)))
            .collect();
        url.push_str(&pairs.join("&"));
    }

    normalize(&url)
}

/// Form-encode a query value (`&` becomes `%26`, space becomes `+`).
pub fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Collapse repeated `/` and resolve `.`/`..` in the path component. The
/// scheme separator, query and fragment are left untouched.
pub fn normalize(url: &str) -> String {
    let (target, suffix) = match url.find(['?', '#']) {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };

    let (prefix, path) = match target.find("://") {
        Some(idx) => {
            let after_scheme = idx + 3;
            match target[after_scheme..].find('/') {
                Some(slash) => target.split_at(after_scheme + slash),
                None => (target, ""),
            }
        }
        None => ("", target),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = String::with_capacity(url.len());
    normalized.push_str(prefix);
    if !segments.is_empty() {
        if !prefix.is_empty() || path.starts_with('/') {
            normalized.push('/');
        }
        normalized.push_str(&segments.join("/"));
    }
    if path.len() > 1 && path.ends_with('/') && !segments.is_empty() {
        normalized.push('/');
    } else if segments.is_empty() && !prefix.is_empty() && path.ends_with('/') {
        normalized.push('/');
    }
    normalized.push_str(suffix);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_double_slashes() {
        assert_eq!(
            normalize("http://api.fulton.com//news///1"),
            "http://api.fulton.com/news/1"
        );
    }

    #[test]
    fn normalize_keeps_trailing_slash_of_root() {
        assert_eq!(
            normalize("https://topdog.varick.io/api/"),
            "https://topdog.varick.io/api/"
        );
        assert_eq!(normalize("https://topdog.varick.io/"), "https://topdog.varick.io/");
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        assert_eq!(
            normalize("http://host/a/./b/../c"),
            "http://host/a/c"
        );
    }

    #[test]
    fn normalize_leaves_query_alone() {
        assert_eq!(
            normalize("http://host//a?next=//b"),
            "http://host/a?next=//b"
        );
    }

    #[test]
    fn normalize_relative_path() {
        assert_eq!(normalize("/api//news"), "/api/news");
        assert_eq!(normalize("api//news"), "api/news");
    }

    #[test]
    fn build_root_with_trailing_slash_and_leading_slash_path() {
        let url = build(
            "https://topdog.varick.io/api/",
            &["/posts".to_string()],
            None,
            &[],
        );
        assert_eq!(url, "https://topdog.varick.io/api/posts");
    }

    #[test]
    fn build_appends_to_existing_query() {
        let url = build(
            "http://host/api?key=1",
            &[],
            None,
            &[("q".to_string(), "a b".to_string())],
        );
        assert_eq!(url, "http://host/api?key=1&q=a+b");
    }

    #[test]
    fn encode_escapes_reserved_characters() {
        assert_eq!(encode("&"), "%26");
        assert_eq!(encode("a=b"), "a%3Db");
        assert_eq!(encode("tags,anchor"), "tags%2Canchor");
    }
}
