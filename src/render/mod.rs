//! Dynamic page rendering
//!
//! A [`Renderer`] drives a real browser for pages whose links only appear
//! after JavaScript runs. Renderers hold a single page at a time and are not
//! shared between workers.
//!
//! The Chromium backend is compiled with the `browser` feature. Without it,
//! [`create_renderer`] returns `None` and crawls fall back to static fetching.

#[cfg(feature = "browser")]
mod chromium;

#[cfg(feature = "browser")]
pub use chromium::ChromiumRenderer;

use crate::config::RenderConfig;
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;
use url::Url;

/// Errors from browser rendering
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Renderer has not been started")]
    NotStarted,

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Script evaluation failed: {0}")]
    Script(String),
}

/// A browser that can load one page and report what it links to
#[async_trait]
pub trait Renderer: Send {
    /// Launches the browser, optionally routed through a proxy
    async fn start(&mut self, proxy: Option<&str>) -> Result<(), RenderError>;

    /// Loads a page and waits for it to settle
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError>;

    /// Absolute links on the loaded page
    async fn extract_links(&mut self, base_url: &Url) -> Result<BTreeSet<Url>, RenderError>;

    /// URLs on the loaded page whose extension is one of `extensions`
    ///
    /// Covers elements that only reveal a file URL through data attributes or
    /// click handlers, which plain link extraction misses.
    async fn find_download_triggers(
        &mut self,
        extensions: &[String],
    ) -> Result<Vec<Url>, RenderError>;

    /// Closes the browser; safe to call when not started
    async fn stop(&mut self);

    fn is_started(&self) -> bool;
}

/// Creates the renderer compiled into this build
#[cfg(feature = "browser")]
pub fn create_renderer(config: &RenderConfig) -> Option<Box<dyn Renderer>> {
    Some(Box::new(ChromiumRenderer::new(config)))
}

/// Creates the renderer compiled into this build
#[cfg(not(feature = "browser"))]
pub fn create_renderer(_config: &RenderConfig) -> Option<Box<dyn Renderer>> {
    tracing::warn!("Built without the `browser` feature; dynamic rendering falls back to static fetching");
    None
}

/// Keeps the URLs whose path ends in one of `extensions`
pub fn filter_by_extension(urls: impl IntoIterator<Item = Url>, extensions: &[String]) -> Vec<Url> {
    let wanted: Vec<String> = extensions
        .iter()
        .map(|e| crate::url::normalize_extension(e))
        .collect();

    let mut matched: Vec<Url> = urls
        .into_iter()
        .filter(|url| {
            crate::url::file_extension(url)
                .map(|ext| wanted.contains(&ext))
                .unwrap_or(false)
        })
        .collect();
    matched.sort();
    matched.dedup();
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_by_extension() {
        let urls = vec![
            Url::parse("https://example.com/a.pdf").unwrap(),
            Url::parse("https://example.com/b.PDF").unwrap(),
            Url::parse("https://example.com/page.html").unwrap(),
            Url::parse("https://example.com/a.pdf").unwrap(),
        ];
        let matched = filter_by_extension(urls, &["pdf".to_string()]);
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|u| u.path().to_lowercase().ends_with(".pdf")));
    }

    #[test]
    fn test_render_error_messages() {
        let err = RenderError::Navigation {
            url: "https://example.com/".to_string(),
            message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        };
        assert!(err.to_string().contains("https://example.com/"));
        assert_eq!(
            RenderError::NotStarted.to_string(),
            "Renderer has not been started"
        );
    }

    #[cfg(not(feature = "browser"))]
    #[test]
    fn test_no_renderer_without_feature() {
        assert!(create_renderer(&RenderConfig::default()).is_none());
    }
}
