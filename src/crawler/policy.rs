//! Static/dynamic fetch policy
//!
//! Workers see a single [`FetchPolicy`]; it decides per URL whether the
//! page is fetched over plain HTTP, rendered in a browser, or both.

use crate::config::DynamicMode;
use crate::crawler::fetcher::{FetchClient, FetchOutcome};
use crate::crawler::parser::LinkExtractor;
use crate::crawler::response::FetchedPage;
use crate::proxy::ProxyPool;
use crate::render::Renderer;
use crate::url::CrawlScope;
use async_trait::async_trait;
use regex::RegexSet;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use url::Url;

/// URL path tokens that suggest a client-rendered page
const URL_INDICATORS: &[&str] = &[
    "react",
    "vue",
    "angular",
    "spa",
    "single-page",
    "javascript",
    "js",
    "ajax",
    "dynamic",
];

/// Markup patterns typical of pages that build their content in script
const CONTENT_PATTERNS: &[&str] = &[
    r"<script[^>]*src=[^>]*>",
    r#"<div[^>]*id=["'][^"']*react[^"']*["']"#,
    r"<div[^>]*data-react",
    r"window\.__INITIAL_STATE__",
    r"window\.__REDUX_STATE__",
    r"angular\.module",
    r"vue\.createApp",
    r"new Vue",
    r"\.getElementById.*\.innerHTML\s*=",
    r"fetch\s*\(",
    r"\$\.ajax",
    r"XMLHttpRequest",
    r"document\.write",
    r"setTimeout.*function",
    r"addEventListener.*load",
    r"onload\s*=",
    r"<noscript>",
    r"<!--\[if[^>]*IE.*\]>",
];

/// Pattern hits that alone justify rendering
const STRONG_SIGNAL_SCORE: usize = 3;

/// Pages shorter than this need only one pattern hit
const THIN_CONTENT_CHARS: usize = 500;

fn content_patterns() -> Option<&'static RegexSet> {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(CONTENT_PATTERNS.iter().map(|p| format!("(?is){}", p))).ok()
    })
    .as_ref()
}

/// How a page was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Static,
    Dynamic,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("static"),
            Self::Dynamic => f.write_str("dynamic"),
        }
    }
}

/// Everything a worker needs from one fetched page
#[derive(Debug, Clone)]
pub struct PageContent {
    pub strategy: Strategy,
    /// Links found on the page, absolute and canonical
    pub links: BTreeSet<Url>,
    /// File URLs surfaced by the renderer outside ordinary links
    pub download_triggers: Vec<Url>,
    /// The static response, when there was one
    pub page: Option<Arc<FetchedPage>>,
}

/// Per-URL result of a fetch strategy
#[derive(Debug, Clone)]
pub enum PageResult {
    Fetched(PageContent),
    Failed { reason: String },
    Cancelled,
}

impl PageResult {
    pub fn content(&self) -> Option<&PageContent> {
        match self {
            Self::Fetched(content) => Some(content),
            _ => None,
        }
    }
}

/// One way of turning a URL into a [`PageResult`]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_page(&self, url: &str, caller: &str) -> PageResult;
}

/// Plain HTTP fetch through the proxy ladder
pub struct StaticFetcher {
    client: Arc<FetchClient>,
    extractor: Arc<dyn LinkExtractor>,
}

impl StaticFetcher {
    pub fn new(client: Arc<FetchClient>, extractor: Arc<dyn LinkExtractor>) -> Self {
        Self { client, extractor }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch_page(&self, url: &str, caller: &str) -> PageResult {
        match self.client.fetch(url, caller).await {
            FetchOutcome::Success(page) => {
                let links = match Url::parse(&page.final_url) {
                    Ok(base) if page.is_html() => self.extractor.extract_links(page.text(), &base),
                    _ => BTreeSet::new(),
                };
                PageResult::Fetched(PageContent {
                    strategy: Strategy::Static,
                    links,
                    download_triggers: Vec::new(),
                    page: Some(page),
                })
            }
            FetchOutcome::Cancelled => PageResult::Cancelled,
            failure => PageResult::Failed {
                reason: failure.to_string(),
            },
        }
    }
}

/// Browser rendering through a single shared renderer
///
/// The renderer is started lazily on first use, through a proxy from the
/// pool when one is available.
pub struct DynamicFetcher {
    renderer: Arc<tokio::sync::Mutex<Box<dyn Renderer>>>,
    pool: Arc<ProxyPool>,
    download_extensions: Vec<String>,
    cancel: CancellationToken,
}

impl DynamicFetcher {
    pub fn new(
        renderer: Box<dyn Renderer>,
        pool: Arc<ProxyPool>,
        download_extensions: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            renderer: Arc::new(tokio::sync::Mutex::new(renderer)),
            pool,
            download_extensions,
            cancel,
        }
    }

    /// Closes the browser if it was started
    pub async fn shutdown(&self) {
        let mut renderer = self.renderer.lock().await;
        if renderer.is_started() {
            renderer.stop().await;
        }
    }
}

#[async_trait]
impl Fetcher for DynamicFetcher {
    async fn fetch_page(&self, url: &str, caller: &str) -> PageResult {
        if self.cancel.is_cancelled() {
            return PageResult::Cancelled;
        }

        let base = match Url::parse(url) {
            Ok(base) => base,
            Err(e) => {
                return PageResult::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let mut renderer = self.renderer.lock().await;

        if !renderer.is_started() {
            let proxy = self.pool.select(caller);
            if let Err(e) = renderer.start(proxy.as_deref()).await {
                tracing::error!("Could not start renderer: {}", e);
                return PageResult::Failed {
                    reason: e.to_string(),
                };
            }
        }

        if let Err(e) = renderer.navigate(url).await {
            tracing::warn!("Render failed for {}: {}", url, e);
            return PageResult::Failed {
                reason: e.to_string(),
            };
        }

        let links = renderer.extract_links(&base).await.unwrap_or_else(|e| {
            tracing::warn!("Link extraction failed for {}: {}", url, e);
            BTreeSet::new()
        });
        let download_triggers = renderer
            .find_download_triggers(&self.download_extensions)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("No download triggers for {}: {}", url, e);
                Vec::new()
            });

        PageResult::Fetched(PageContent {
            strategy: Strategy::Dynamic,
            links,
            download_triggers,
            page: None,
        })
    }
}

/// Number of client-rendering patterns present in a page
pub fn dynamic_content_score(html: &str) -> usize {
    content_patterns()
        .map(|set| set.matches(html).iter().count())
        .unwrap_or(0)
}

/// Returns true if the URL itself hints at a client-rendered page
///
/// Indicators must match a whole path or query token, so `/reactor` does not
/// count as `react`.
pub fn url_suggests_dynamic(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    let tail = match Url::parse(&lowered) {
        Ok(parsed) => format!("{}?{}", parsed.path(), parsed.query().unwrap_or("")),
        Err(_) => lowered,
    };

    tail.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .any(|token| URL_INDICATORS.contains(&token))
}

/// Returns true if a page's markup looks client-rendered
pub fn content_suggests_dynamic(html: &str) -> bool {
    let score = dynamic_content_score(html);
    score >= STRONG_SIGNAL_SCORE || (html.trim().len() < THIN_CONTENT_CHARS && score > 0)
}

/// Chooses between static fetching and rendering per URL
pub struct FetchPolicy {
    mode: DynamicMode,
    static_fetcher: StaticFetcher,
    dynamic_fetcher: Option<DynamicFetcher>,
    scope: CrawlScope,
}

impl FetchPolicy {
    /// Creates a policy
    ///
    /// Without a dynamic fetcher every mode behaves like `never`.
    pub fn new(
        mode: DynamicMode,
        static_fetcher: StaticFetcher,
        dynamic_fetcher: Option<DynamicFetcher>,
        scope: CrawlScope,
    ) -> Self {
        if mode.uses_renderer() && dynamic_fetcher.is_none() {
            tracing::warn!("Dynamic mode '{}' requested without a renderer, using static fetching", mode);
        }
        Self {
            mode,
            static_fetcher,
            dynamic_fetcher,
            scope,
        }
    }

    pub fn mode(&self) -> DynamicMode {
        self.mode
    }

    /// Fetches a page with the strategy the mode calls for
    pub async fn fetch(&self, url: &str, caller: &str) -> PageResult {
        let dynamic = match (&self.dynamic_fetcher, self.mode) {
            (Some(dynamic), DynamicMode::Always) => return dynamic.fetch_page(url, caller).await,
            (Some(dynamic), DynamicMode::Auto) => dynamic,
            _ => return self.static_fetcher.fetch_page(url, caller).await,
        };

        let result = self.static_fetcher.fetch_page(url, caller).await;
        let escalate = match &result {
            PageResult::Cancelled => false,
            PageResult::Failed { reason } => {
                tracing::info!("Static fetch failed for {} ({}), rendering instead", url, reason);
                true
            }
            PageResult::Fetched(content) => self.needs_rendering(url, content),
        };

        if !escalate {
            return result;
        }

        match (result, dynamic.fetch_page(url, caller).await) {
            (PageResult::Fetched(mut static_content), PageResult::Fetched(rendered)) => {
                static_content.links.extend(rendered.links);
                static_content.download_triggers = rendered.download_triggers;
                static_content.strategy = Strategy::Dynamic;
                PageResult::Fetched(static_content)
            }
            (PageResult::Fetched(static_content), _) => PageResult::Fetched(static_content),
            (_, rendered) => rendered,
        }
    }

    /// Decides whether a successful static fetch should be rendered too
    ///
    /// Pages that already link to files never are. Otherwise the URL or
    /// the markup must show signs of client-side rendering.
    pub fn needs_rendering(&self, url: &str, content: &PageContent) -> bool {
        if content.links.iter().any(|link| self.scope.is_file_target(link)) {
            return false;
        }

        if url_suggests_dynamic(url) {
            tracing::debug!("URL of {} suggests dynamic content", url);
            return true;
        }

        let html = match &content.page {
            Some(page) if page.is_html() => page.text(),
            _ => return false,
        };

        let rendered = content_suggests_dynamic(html);
        if rendered {
            tracing::debug!("Markup of {} suggests dynamic content", url);
        }
        rendered
    }

    /// Releases the renderer, if any
    pub async fn shutdown(&self) {
        if let Some(dynamic) = &self.dynamic_fetcher {
            dynamic.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::render::RenderError;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

    #[test]
    fn test_url_indicators() {
        assert!(url_suggests_dynamic("https://example.com/react/app"));
        assert!(url_suggests_dynamic("https://example.com/docs/single-page"));
        assert!(url_suggests_dynamic("https://example.com/page?view=ajax"));
        assert!(!url_suggests_dynamic("https://example.com/reactor/manual"));
        assert!(!url_suggests_dynamic("https://example.com/about"));
        // Host names are not inspected
        assert!(!url_suggests_dynamic("https://vue.example.com/about"));
    }

    #[test]
    fn test_content_score() {
        let spa = r#"<html><head><script src="/bundle.js"></script></head>
            <body><div id="react-root"></div>
            <script>window.__INITIAL_STATE__ = {}; fetch("/api/items");</script></body></html>"#;
        assert!(dynamic_content_score(spa) >= 3);
        assert!(content_suggests_dynamic(spa));

        let plain = format!("<html><body>{}</body></html>", "<p>static text</p>".repeat(50));
        assert_eq!(dynamic_content_score(&plain), 0);
        assert!(!content_suggests_dynamic(&plain));
    }

    #[test]
    fn test_thin_page_with_one_signal() {
        let thin = "<html><body><noscript>Enable JavaScript</noscript></body></html>";
        assert_eq!(dynamic_content_score(thin), 1);
        assert!(content_suggests_dynamic(thin));

        let long = format!(
            "<html><body><noscript>Enable JavaScript</noscript>{}</body></html>",
            "<p>long static text</p>".repeat(40)
        );
        assert!(!content_suggests_dynamic(&long));
    }

    struct StubRenderer {
        started: bool,
        links: Vec<&'static str>,
        fail_navigation: bool,
    }

    #[async_trait]
    impl Renderer for StubRenderer {
        async fn start(&mut self, _proxy: Option<&str>) -> Result<(), RenderError> {
            self.started = true;
            Ok(())
        }

        async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
            if self.fail_navigation {
                return Err(RenderError::Navigation {
                    url: url.to_string(),
                    message: "stub".to_string(),
                });
            }
            Ok(())
        }

        async fn extract_links(&mut self, _base_url: &Url) -> Result<BTreeSet<Url>, RenderError> {
            Ok(self.links.iter().filter_map(|l| Url::parse(l).ok()).collect())
        }

        async fn find_download_triggers(
            &mut self,
            _extensions: &[String],
        ) -> Result<Vec<Url>, RenderError> {
            Ok(vec![Url::parse("https://example.com/hidden.pdf").unwrap()])
        }

        async fn stop(&mut self) {
            self.started = false;
        }

        fn is_started(&self) -> bool {
            self.started
        }
    }

    fn dynamic_fetcher(fail_navigation: bool) -> DynamicFetcher {
        DynamicFetcher::new(
            Box::new(StubRenderer {
                started: false,
                links: vec!["https://example.com/rendered"],
                fail_navigation,
            }),
            Arc::new(ProxyPool::empty(&crate::config::ProxyConfig::default())),
            vec!["pdf".to_string()],
            CancellationToken::new(),
        )
    }

    fn scope() -> CrawlScope {
        CrawlScope::from_config(&CrawlConfig::new("https://example.com/")).unwrap()
    }

    fn static_content(html: &str, links: &[&str]) -> PageContent {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        PageContent {
            strategy: Strategy::Static,
            links: links.iter().filter_map(|l| Url::parse(l).ok()).collect(),
            download_triggers: Vec::new(),
            page: Some(Arc::new(FetchedPage::new(
                "https://example.com/",
                "https://example.com/",
                200,
                headers,
                html.as_bytes().to_vec(),
            ))),
        }
    }

    fn policy(mode: DynamicMode) -> FetchPolicy {
        let client = FetchClient::new(
            crate::crawler::fetcher::ClientSettings::from_config(&CrawlConfig::new(
                "https://example.com/",
            )),
            crate::config::RetryConfig::default(),
            Arc::new(ProxyPool::empty(&crate::config::ProxyConfig::default())),
            Arc::new(crate::crawler::RateLimiter::new(
                &crate::config::RateLimitConfig::default(),
            )),
        );
        FetchPolicy::new(
            mode,
            StaticFetcher::new(Arc::new(client), Arc::new(crate::crawler::HtmlExtractor)),
            Some(dynamic_fetcher(false)),
            scope(),
        )
    }

    #[test]
    fn test_target_files_skip_rendering() {
        let policy = policy(DynamicMode::Auto);
        let spa = r#"<div id="react-root"></div><noscript>js</noscript><script>fetch("/x")</script>"#;
        let content = static_content(spa, &["https://example.com/report.pdf"]);
        assert!(!policy.needs_rendering("https://example.com/", &content));
    }

    #[test]
    fn test_spa_markup_triggers_rendering() {
        let policy = policy(DynamicMode::Auto);
        let spa = r#"<div id="react-root"></div><noscript>js</noscript><script>fetch("/x")</script>"#;
        let content = static_content(spa, &[]);
        assert!(policy.needs_rendering("https://example.com/", &content));

        let plain = format!("<p>{}</p>", "plain words ".repeat(100));
        let content = static_content(&plain, &["https://example.com/next"]);
        assert!(!policy.needs_rendering("https://example.com/", &content));
    }

    #[tokio::test]
    async fn test_dynamic_fetcher_collects_links_and_triggers() {
        let fetcher = dynamic_fetcher(false);
        let result = fetcher.fetch_page("https://example.com/app", "w0").await;
        let content = result.content().unwrap();
        assert_eq!(content.strategy, Strategy::Dynamic);
        assert!(content
            .links
            .contains(&Url::parse("https://example.com/rendered").unwrap()));
        assert_eq!(content.download_triggers.len(), 1);
        fetcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_render_failure_is_a_value() {
        let fetcher = dynamic_fetcher(true);
        let result = fetcher.fetch_page("https://example.com/app", "w0").await;
        assert!(matches!(result, PageResult::Failed { .. }));
    }

    #[tokio::test]
    async fn test_always_mode_renders_without_static_fetch() {
        // Never touches the static client
        let policy = policy(DynamicMode::Always);
        let result = policy.fetch("https://example.com/app", "w0").await;
        assert_eq!(result.content().unwrap().strategy, Strategy::Dynamic);
    }
}
