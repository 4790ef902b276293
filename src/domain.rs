/// Hostname normalization and validation for the allow-list
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("hostname pattern is valid")
});

/// Reduce user input to a bare hostname
///
/// Algorithm:
/// 1. Trim whitespace
/// 2. Drop everything up to and including "://" (any scheme, any case)
/// 3. Cut at the first '/', '?' or '#'
/// 4. Drop userinfo ("user@") and port (":8080")
/// 5. Lowercase
///
/// Examples:
/// - HTTPS://Example.COM:8080/path → example.com
/// - news.bbc.co.uk/article → news.bbc.co.uk
/// - "" → ""
pub fn normalize(input: &str) -> String {
    let trimmed = input.trim();

    let without_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };

    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();

    let host_with_port = authority.rsplit('@').next().unwrap_or_default();

    host_with_port
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Check that a hostname is DNS-shaped: non-empty, at most 253 chars,
/// labels of 1-63 alphanumerics/hyphens that don't start or end with '-'
pub fn is_valid(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    if !HOSTNAME_RE.is_match(hostname) {
        return false;
    }

    hostname.split('.').all(|label| label.len() <= MAX_LABEL_LEN)
}

/// Normalize every entry, dropping invalid ones and duplicates (first one wins)
pub fn sanitize_allow_list<I, S>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();

    entries
        .into_iter()
        .map(|entry| normalize(entry.as_ref()))
        .filter(|host| is_valid(host))
        .filter(|host| seen.insert(host.clone()))
        .collect()
}

/// Lowercase hostname of an http(s) URL
pub fn hostname_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    parsed.host_str().map(|host| host.to_lowercase())
}

/// Only regular web pages are tracked; chrome://, file://, extension pages etc. are not
pub fn is_trackable_url(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_scheme_port_and_path() {
        assert_eq!(normalize("HTTPS://Example.COM:8080/path"), "example.com");
        assert_eq!(normalize("http://github.com/rust-lang/rust"), "github.com");
        assert_eq!(normalize("ftp://files.example.org"), "files.example.org");
    }

    #[test]
    fn test_normalize_bare_hosts() {
        assert_eq!(normalize("  News.BBC.co.uk  "), "news.bbc.co.uk");
        assert_eq!(normalize("localhost:3000"), "localhost");
        assert_eq!(normalize("example.com?q=1"), "example.com");
        assert_eq!(normalize("user:pw@example.com/x"), "example.com");
    }

    #[test]
    fn test_normalize_garbage() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("https://"), "");
        assert_eq!(normalize("///"), "");
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("example.com"));
        assert!(is_valid("a.b.c.example.co.uk"));
        assert!(is_valid("localhost"));
        assert!(is_valid("xn--bcher-kva.example"));
    }

    #[test]
    fn test_is_valid_rejects_bad_labels() {
        assert!(!is_valid(""));
        assert!(!is_valid("-bad-.com"));
        assert!(!is_valid("bad-.com"));
        assert!(!is_valid("exa mple.com"));
        assert!(!is_valid("example..com"));
        assert!(!is_valid("under_score.com"));
    }

    #[test]
    fn test_is_valid_length_limits() {
        let label_63 = "a".repeat(63);
        let label_64 = "a".repeat(64);
        assert!(is_valid(&format!("{}.com", label_63)));
        assert!(!is_valid(&format!("{}.com", label_64)));

        // 4 labels of 63 + 3 dots = 255 chars
        let too_long = vec![label_63.as_str(); 4].join(".");
        assert!(!is_valid(&too_long));
    }

    #[test]
    fn test_sanitize_allow_list() {
        let entries = vec![
            "https://Example.com/",
            "example.com",
            "-bad-.com",
            "",
            "github.com:443",
        ];

        assert_eq!(
            sanitize_allow_list(entries),
            vec!["example.com".to_string(), "github.com".to_string()]
        );
    }

    #[test]
    fn test_hostname_of() {
        assert_eq!(hostname_of("https://Example.com/a?b=c"), Some("example.com".to_string()));
        assert_eq!(hostname_of("http://127.0.0.1:8080/"), Some("127.0.0.1".to_string()));
        assert_eq!(hostname_of("chrome://extensions"), None);
        assert_eq!(hostname_of("not a url"), None);
    }

    #[test]
    fn test_is_trackable_url() {
        assert!(is_trackable_url("https://example.com"));
        assert!(is_trackable_url("http://localhost:3000/app"));
        assert!(!is_trackable_url("chrome://newtab/"));
        assert!(!is_trackable_url("chrome-extension://abc/frozen.html"));
        assert!(!is_trackable_url(""));
    }
}
