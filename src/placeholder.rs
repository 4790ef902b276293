/// URL scheme of the placeholder page a frozen tab is parked on
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

pub const PLACEHOLDER_PAGE: &str = "frozen.html";

/// What the placeholder needs to render itself and to navigate back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderParams {
    pub title: String,
    pub url: String,
    pub icon: String,
}

/// `base` is the absolute URL of the bundled placeholder page
pub fn build_url(base: &str, params: &PlaceholderParams) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("title", &params.title)
        .append_pair("url", &params.url)
        .append_pair("icon", &params.icon)
        .finish();

    format!("{}?{}", base, query)
}

/// Parse a `location.search` string. None if the original URL is missing.
pub fn parse_query(search: &str) -> Option<PlaceholderParams> {
    let mut params = PlaceholderParams::default();

    for (key, value) in form_urlencoded::parse(search.trim_start_matches('?').as_bytes()) {
        match key.as_ref() {
            "title" => params.title = value.into_owned(),
            "url" => params.url = value.into_owned(),
            "icon" => params.icon = value.into_owned(),
            _ => {}
        }
    }

    if params.url.is_empty() {
        None
    } else {
        Some(params)
    }
}

pub fn is_placeholder_url(base: &str, url: &str) -> bool {
    url.strip_prefix(base)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('?') || rest.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "chrome-extension://abc/frozen.html";

    #[test]
    fn test_build_url_escapes_values() {
        let params = PlaceholderParams {
            title: "Rust & WASM?".to_string(),
            url: "https://example.com/a?b=c&d=e#top".to_string(),
            icon: String::new(),
        };

        let url = build_url(BASE, &params);

        assert!(url.starts_with("chrome-extension://abc/frozen.html?title=Rust+%26+WASM%3F&url="));
        assert!(!url.contains("b=c&d"));
        assert_eq!(parse_query(&url[BASE.len()..]), Some(params));
    }

    #[test]
    fn test_parse_query_requires_url() {
        assert_eq!(parse_query("?title=Only+title"), None);
        assert_eq!(parse_query(""), None);
    }

    #[test]
    fn test_is_placeholder_url() {
        assert!(is_placeholder_url(BASE, "chrome-extension://abc/frozen.html?title=x&url=y"));
        assert!(is_placeholder_url(BASE, BASE));
        assert!(!is_placeholder_url(BASE, "chrome-extension://abc/frozen.html.bak"));
        assert!(!is_placeholder_url(BASE, "https://example.com"));
    }
}
