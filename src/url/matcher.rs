use url::Url;

/// Checks a URL against include/exclude substring patterns
///
/// Exclusions win: a URL containing any exclude pattern is rejected. When the
/// include list is non-empty, the URL must contain at least one of its patterns.
///
/// # Examples
///
/// ```
/// use siphon::url::matches_patterns;
///
/// let include = vec!["/docs/".to_string()];
/// let exclude = vec!["/docs/private".to_string()];
///
/// assert!(matches_patterns("https://example.com/docs/a", &include, &exclude));
/// assert!(!matches_patterns("https://example.com/docs/private/a", &include, &exclude));
/// assert!(!matches_patterns("https://example.com/blog/", &include, &exclude));
/// ```
pub fn matches_patterns(url: &str, include: &[String], exclude: &[String]) -> bool {
    if exclude.iter().any(|pattern| url.contains(pattern.as_str())) {
        return false;
    }

    include.is_empty() || include.iter().any(|pattern| url.contains(pattern.as_str()))
}

/// Extracts the lower-cased file extension from a URL's path
///
/// Only the last path segment is considered. `mdc` is reported as `md`.
/// Returns `None` when the last segment has no extension.
pub fn file_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }

    let ext = ext.to_ascii_lowercase();
    if ext == "mdc" {
        Some("md".to_string())
    } else {
        Some(ext)
    }
}

/// Normalizes a configured extension (`.PDF` -> `pdf`)
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
