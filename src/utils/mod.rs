//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Resolve a potentially relative link against the page it appeared on.
pub fn resolve_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok()
}

/// Host plus any non-default port, e.g. `example.com:8080`.
pub fn host_with_port(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (Some(h), None) => h.to_string(),
        _ => String::new(),
    }
}

/// Bring a URL into canonical form so equivalent links compare equal.
///
/// Parsing already lowercases scheme and host, drops default ports and
/// resolves dot segments. On top of that: duplicate slashes are collapsed,
/// a trailing slash is removed (except for the root path) and an empty
/// query is dropped.
pub fn normalize_url(mut url: Url) -> Url {
    if url.cannot_be_a_base() {
        return url;
    }

    let path = url.path();
    let mut cleaned = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && cleaned.ends_with('/') {
            continue;
        }
        cleaned.push(c);
    }
    while cleaned.len() > 1 && cleaned.ends_with('/') {
        cleaned.pop();
    }
    if cleaned != url.path() {
        url.set_path(&cleaned);
    }

    if url.query() == Some("") {
        url.set_query(None);
    }
    url
}

/// Drop the `#fragment` part.
pub fn strip_fragment(url: &mut Url) {
    url.set_fragment(None);
}

/// Drop the `?query` part.
pub fn strip_query(url: &mut Url) {
    url.set_query(None);
}
