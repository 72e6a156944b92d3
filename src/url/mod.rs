//! URL handling module for Siphon
//!
//! This module provides URL canonicalization, link resolution, include/exclude
//! pattern matching, and the crawl scope that decides which URLs are crawled
//! and which are downloaded.

mod matcher;
mod normalize;

use crate::config::CrawlConfig;
use crate::state::SkipReason;
use crate::{UrlError, UrlResult};
use std::collections::HashSet;
use url::Url;

// Re-export main functions
pub use matcher::{file_extension, matches_patterns, normalize_extension};
pub use normalize::{authority, canonicalize, resolve_link};

/// Domain, pattern and extension rules for a single crawl
#[derive(Debug, Clone)]
pub struct CrawlScope {
    domain: String,
    include: Vec<String>,
    exclude: Vec<String>,
    download_extensions: HashSet<String>,
    exclude_extensions: HashSet<String>,
    crawl_only: bool,
}

impl CrawlScope {
    /// Builds the scope from crawl configuration
    ///
    /// The domain defaults to the start URL's authority (`host` or `host:port`).
    ///
    /// # Errors
    ///
    /// Returns `UrlError` if no domain is configured and the start URL is unusable.
    pub fn from_config(config: &CrawlConfig) -> UrlResult<Self> {
        let domain = match &config.domain {
            Some(domain) => domain.trim().to_lowercase(),
            None => {
                let start = canonicalize(&config.start_url)?;
                authority(&start).ok_or(UrlError::MissingHost)?
            }
        };

        Ok(Self {
            domain,
            include: config.include_urls.clone(),
            exclude: config.exclude_urls.clone(),
            download_extensions: config
                .download_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            exclude_extensions: config
                .exclude_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            crawl_only: config.crawl_only,
        })
    }

    /// The authority this crawl is restricted to
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns true if the URL belongs to the crawl's domain
    ///
    /// A configured domain with a port must match `host:port` exactly;
    /// one without a port matches on host alone.
    pub fn in_domain(&self, url: &Url) -> bool {
        if self.domain.contains(':') {
            authority(url).as_deref() == Some(self.domain.as_str())
        } else {
            url.host_str()
                .map(|h| h.eq_ignore_ascii_case(&self.domain))
                .unwrap_or(false)
        }
    }

    /// Classifies a URL against domain scope and URL patterns
    ///
    /// Returns `None` when the URL may be crawled, otherwise the reason it may not.
    pub fn check(&self, url: &Url) -> Option<SkipReason> {
        if !self.in_domain(url) {
            return Some(SkipReason::OutOfScope);
        }
        if !matches_patterns(url.as_str(), &self.include, &self.exclude) {
            return Some(SkipReason::ExcludedPattern);
        }
        None
    }

    /// Returns true if the URL is in scope and passes the include/exclude patterns
    pub fn should_crawl(&self, url: &Url) -> bool {
        self.check(url).is_none()
    }

    /// Returns true if the URL points at a file matching the download criteria
    ///
    /// Excluded extensions never match; otherwise the extension must be one
    /// of the download extensions.
    pub fn is_file_target(&self, url: &Url) -> bool {
        match file_extension(url) {
            Some(ext) => {
                !self.exclude_extensions.contains(&ext) && self.download_extensions.contains(&ext)
            }
            None => false,
        }
    }

    /// Returns true if the URL is a file target and downloads are enabled
    ///
    /// Always false in crawl-only mode, where file targets are only listed.
    pub fn should_download(&self, url: &Url) -> bool {
        !self.crawl_only && self.is_file_target(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> CrawlConfig {
        let mut config = CrawlConfig::new("https://example.com/docs/");
        config.download_extensions = vec!["pdf".to_string(), ".ZIP".to_string(), "md".to_string()];
        config
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_domain_defaults_to_start_url() {
        let scope = CrawlScope::from_config(&create_test_config()).unwrap();
        assert_eq!(scope.domain(), "example.com");
    }

    #[test]
    fn test_domain_with_port() {
        let config = CrawlConfig::new("http://127.0.0.1:8080/");
        let scope = CrawlScope::from_config(&config).unwrap();
        assert_eq!(scope.domain(), "127.0.0.1:8080");
        assert!(scope.in_domain(&url("http://127.0.0.1:8080/page")));
        assert!(!scope.in_domain(&url("http://127.0.0.1:9090/page")));
    }

    #[test]
    fn test_out_of_scope() {
        let scope = CrawlScope::from_config(&create_test_config()).unwrap();
        assert_eq!(
            scope.check(&url("https://other.com/")),
            Some(SkipReason::OutOfScope)
        );
        assert_eq!(
            scope.check(&url("https://sub.example.com/")),
            Some(SkipReason::OutOfScope)
        );
        assert_eq!(scope.check(&url("https://EXAMPLE.com/a")), None);
    }

    #[test]
    fn test_excluded_pattern() {
        let mut config = create_test_config();
        config.exclude_urls = vec!["/private".to_string()];
        let scope = CrawlScope::from_config(&config).unwrap();
        assert_eq!(
            scope.check(&url("https://example.com/private/a")),
            Some(SkipReason::ExcludedPattern)
        );
        assert!(scope.should_crawl(&url("https://example.com/public")));
    }

    #[test]
    fn test_include_pattern() {
        let mut config = create_test_config();
        config.include_urls = vec!["/docs/".to_string()];
        let scope = CrawlScope::from_config(&config).unwrap();
        assert!(scope.should_crawl(&url("https://example.com/docs/a")));
        assert!(!scope.should_crawl(&url("https://example.com/blog/a")));
    }

    #[test]
    fn test_should_download() {
        let scope = CrawlScope::from_config(&create_test_config()).unwrap();
        assert!(scope.should_download(&url("https://example.com/a.pdf")));
        assert!(scope.should_download(&url("https://example.com/a.zip")));
        assert!(scope.should_download(&url("https://example.com/rules/a.mdc")));
        assert!(!scope.should_download(&url("https://example.com/a.html")));
        assert!(!scope.should_download(&url("https://example.com/docs/")));
    }

    #[test]
    fn test_excluded_extension_never_downloads() {
        let mut config = create_test_config();
        config.exclude_extensions = vec!["pdf".to_string()];
        let scope = CrawlScope::from_config(&config).unwrap();
        assert!(!scope.should_download(&url("https://example.com/a.pdf")));
        assert!(scope.should_download(&url("https://example.com/a.zip")));
    }

    #[test]
    fn test_crawl_only_disables_downloads() {
        let mut config = create_test_config();
        config.crawl_only = true;
        let scope = CrawlScope::from_config(&config).unwrap();
        assert!(!scope.should_download(&url("https://example.com/a.pdf")));
        assert!(scope.is_file_target(&url("https://example.com/a.pdf")));
    }
}
