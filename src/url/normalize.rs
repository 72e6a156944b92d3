use crate::UrlError;
use url::Url;

/// Canonicalizes a URL into the form used as a frontier key
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject anything other than http and https
/// 3. Reject URLs without a host
/// 4. Remove the fragment (everything after #)
///
/// Host lower-casing, default-port removal and dot-segment resolution are
/// performed by the parser itself. Query strings and trailing slashes are
/// preserved, since servers are free to treat them as distinct resources.
///
/// # Arguments
///
/// * `url_str` - The absolute URL string to canonicalize
///
/// # Returns
///
/// * `Ok(Url)` - Canonical URL
/// * `Err(UrlError)` - Failed to parse or unsupported URL
///
/// # Examples
///
/// ```
/// use siphon::url::canonicalize;
///
/// let url = canonicalize("HTTP://Example.COM:80/a/../b#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/b");
/// ```
pub fn canonicalize(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    canonicalize_parsed(url)
}

/// Resolves a possibly relative reference against a base URL and canonicalizes it
///
/// Returns `None` for references that cannot be followed by an HTTP crawler:
/// empty and fragment-only references, `javascript:`, `mailto:`, `tel:` and
/// `data:` links, and anything that resolves to a non-http(s) URL.
pub fn resolve_link(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }

    let lowered = reference.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        return None;
    }

    let joined = base.join(reference).ok()?;
    canonicalize_parsed(joined).ok()
}

fn canonicalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    url.set_fragment(None);
    Ok(url)
}

/// Returns the authority (`host` or `host:port`) the crawl compares scope against
pub fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_removed() {
        let url = canonicalize("https://example.com/page#section").unwrap();
        assert_eq!(url.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_host_lowercased() {
        let url = canonicalize("https://EXAMPLE.COM/Path").unwrap();
        assert_eq!(url.as_str(), "https://example.com/Path");
    }

    #[test]
    fn test_query_preserved() {
        let url = canonicalize("https://example.com/search?q=rust&page=2").unwrap();
        assert_eq!(url.query(), Some("q=rust&page=2"));
    }

    #[test]
    fn test_trailing_slash_preserved() {
        let url = canonicalize("https://example.com/docs/").unwrap();
        assert_eq!(url.path(), "/docs/");
    }

    #[test]
    fn test_dot_segments_resolved() {
        let url = canonicalize("https://example.com/a/./b/../c").unwrap();
        assert_eq!(url.path(), "/a/c");
    }

    #[test]
    fn test_default_port_dropped() {
        let url = canonicalize("https://example.com:443/").unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_invalid_scheme() {
        assert!(matches!(
            canonicalize("ftp://example.com/file"),
            Err(UrlError::InvalidScheme(_))
        ));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(canonicalize("not a url"), Err(UrlError::Parse(_))));
    }

    #[test]
    fn test_resolve_relative() {
        let base = Url::parse("https://example.com/docs/index.html").unwrap();
        let url = resolve_link(&base, "guide.html#intro").unwrap();
        assert_eq!(url.as_str(), "https://example.com/docs/guide.html");

        let url = resolve_link(&base, "/files/report.pdf").unwrap();
        assert_eq!(url.as_str(), "https://example.com/files/report.pdf");
    }

    #[test]
    fn test_resolve_rejects_non_navigational() {
        let base = Url::parse("https://example.com/").unwrap();
        assert!(resolve_link(&base, "#top").is_none());
        assert!(resolve_link(&base, "").is_none());
        assert!(resolve_link(&base, "javascript:void(0)").is_none());
        assert!(resolve_link(&base, "JavaScript:alert(1)").is_none());
        assert!(resolve_link(&base, "mailto:someone@example.com").is_none());
        assert!(resolve_link(&base, "tel:+15555550100").is_none());
        assert!(resolve_link(&base, "data:text/plain,hi").is_none());
        assert!(resolve_link(&base, "ftp://example.com/file").is_none());
    }

    #[test]
    fn test_authority() {
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(authority(&url), Some("127.0.0.1:8080".to_string()));

        let url = Url::parse("https://Example.com/").unwrap();
        assert_eq!(authority(&url), Some("example.com".to_string()));
    }
}
