//! Static HTTP fetching with a proxy fallback ladder
//!
//! This module handles all HTTP requests for the crawler, including:
//! - One reqwest client per proxy, built lazily
//! - Randomized browser headers and rate-limited pacing
//! - Error classification into tagged outcomes
//! - Retries with backoff, an untried-proxy pass, and a direct-connection fallback
//! - A per-crawl response cache keyed by the URL's SHA-256
//! - Streaming responses for file downloads

use crate::config::{CrawlConfig, RetryConfig};
use crate::crawler::headers::request_headers;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::response::FetchedPage;
use crate::proxy::ProxyPool;
use reqwest::{Client, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Error text fragments that identify proxy or network-level failures
///
/// Matched against the error's causes only, never the request URL.
const TRANSPORT_ERROR_MARKERS: &[(&str, TransportKind)] = &[
    ("proxy", TransportKind::Proxy),
    ("tunnel", TransportKind::Proxy),
    ("socks", TransportKind::Proxy),
    ("connection refused", TransportKind::Connect),
    ("dns error", TransportKind::Dns),
    ("failed to lookup address", TransportKind::Dns),
    ("name or service not known", TransportKind::Dns),
    ("no such host", TransportKind::Dns),
    ("connection reset", TransportKind::Reset),
    ("connection aborted", TransportKind::Reset),
    ("connection closed", TransportKind::Reset),
    ("broken pipe", TransportKind::Reset),
    ("timed out", TransportKind::Connect),
];

/// Kind of network-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Connect,
    Dns,
    Proxy,
    Reset,
    /// Failures that cannot be pinned on the network path
    Other,
}

impl TransportKind {
    /// Returns true if the failure is attributed to the proxy that carried it
    pub fn implicates_proxy(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Dns => "dns",
            Self::Proxy => "proxy",
            Self::Reset => "reset",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Result of fetching a URL
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// HTTP 200 with the full body read
    Success(Arc<FetchedPage>),

    /// Any other HTTP status
    HttpError { status: u16, retriable: bool },

    /// The request never produced a response
    TransportError { kind: TransportKind, retriable: bool },

    /// Connect or read timeout
    Timeout,

    /// The crawl was cancelled before the fetch finished
    Cancelled,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The fetched page, if the fetch succeeded
    pub fn page(&self) -> Option<&Arc<FetchedPage>> {
        match self {
            Self::Success(page) => Some(page),
            _ => None,
        }
    }

    fn from_status(status: u16) -> Self {
        Self::HttpError {
            status,
            retriable: status == 429 || status >= 500,
        }
    }

    /// Returns true if another attempt for the same URL might succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Success(_) | Self::Cancelled => false,
            Self::HttpError { retriable, .. } | Self::TransportError { retriable, .. } => {
                *retriable
            }
            Self::Timeout => true,
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(page) => write!(f, "HTTP {} ({} bytes)", page.status, page.body.len()),
            Self::HttpError { status, .. } => write!(f, "HTTP {}", status),
            Self::TransportError { kind, .. } => write!(f, "{} error", kind),
            Self::Timeout => f.write_str("timeout"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// One request attempt as seen by the retry ladder
enum Attempt<T> {
    Done(T, Duration),
    Status(u16, Duration),
    Timeout(String),
    Transport(TransportKind, String),
}

/// Timeouts, TLS policy and header settings for every client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub verify_tls: bool,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
}

impl ClientSettings {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            verify_tls: config.verify_tls,
            user_agent: config.user_agent.clone(),
            headers: config.headers.clone(),
        }
    }
}

/// Builds an HTTP client, optionally routed through a proxy
///
/// # Arguments
///
/// * `settings` - Timeouts and TLS policy
/// * `proxy` - Proxy URL, or `None` for a direct connection
/// * `accept_invalid_certs` - Skip certificate verification
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy URL or TLS backend failure
pub fn build_http_client(
    settings: &ClientSettings,
    proxy: Option<&str>,
    accept_invalid_certs: bool,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.connect_timeout + settings.read_timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .gzip(true)
        .brotli(true);

    builder = match proxy {
        Some(url) => builder.proxy(reqwest::Proxy::all(url)?),
        None => builder.no_proxy(),
    };

    builder.build()
}

/// Fetches URLs through the proxy pool with retries and fallbacks
pub struct FetchClient {
    settings: ClientSettings,
    retry: RetryConfig,
    pool: Arc<ProxyPool>,
    limiter: Arc<RateLimiter>,
    accept_invalid_certs: bool,
    clients: Mutex<HashMap<String, Client>>,
    cache: Mutex<HashMap<String, Arc<FetchedPage>>>,
    cancel: CancellationToken,
}

impl FetchClient {
    /// Creates a fetch client
    ///
    /// Certificate verification is disabled whenever proxies are configured.
    pub fn new(
        settings: ClientSettings,
        retry: RetryConfig,
        pool: Arc<ProxyPool>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let accept_invalid_certs = !settings.verify_tls || pool.has_proxies();
        Self {
            settings,
            retry,
            pool,
            limiter,
            accept_invalid_certs,
            clients: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops retry loops and backoff sleeps when the token is cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Number of pages held in the response cache
    pub fn cached_pages(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Fetches a page, serving repeated URLs from the response cache
    pub async fn fetch(&self, url: &str, caller: &str) -> FetchOutcome {
        let key = cache_key(url);
        let cached = lock(&self.cache).get(&key).cloned();
        if let Some(page) = cached {
            tracing::debug!("Cache hit for {}", url);
            return FetchOutcome::Success(page);
        }

        let read_page = |response: Response| async move {
            let final_url = response.url().to_string();
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            let page = FetchedPage::new(url, final_url, status, headers, body.to_vec());
            Ok::<_, reqwest::Error>(Arc::new(page))
        };

        match self.fetch_with_fallbacks(url, caller, read_page).await {
            Ok(page) => {
                lock(&self.cache).insert(key, page.clone());
                FetchOutcome::Success(page)
            }
            Err(failure) => failure,
        }
    }

    /// Opens a URL through the same ladder and hands back the live response
    ///
    /// The body is left unread and the response cache is bypassed, so file
    /// downloads can be streamed to disk without charset detection.
    ///
    /// # Returns
    ///
    /// * `Ok(Response)` - HTTP 200 with the body still to be read
    /// * `Err(FetchOutcome)` - The non-success outcome of the last attempt
    pub async fn open_stream(&self, url: &str, caller: &str) -> Result<Response, FetchOutcome> {
        self.fetch_with_fallbacks(url, caller, |response: Response| async move {
            Ok::<_, reqwest::Error>(response)
        })
        .await
    }

    /// The retry ladder, generic over how a 200 response is consumed
    async fn fetch_with_fallbacks<T, F, Fut>(
        &self,
        url: &str,
        caller: &str,
        read: F,
    ) -> Result<T, FetchOutcome>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, reqwest::Error>>,
    {
        let max_retries = self.retry.max_retries.max(1);
        let mut tried: HashSet<String> = HashSet::new();
        let mut last = FetchOutcome::Cancelled;

        for attempt in 0..max_retries {
            if self.cancel.is_cancelled() {
                return Err(FetchOutcome::Cancelled);
            }

            self.limiter.wait().await;
            let proxy = self.pool.select(caller);
            if let Some(p) = &proxy {
                tried.insert(p.clone());
            }

            last = match self.attempt_and_record(url, proxy.as_deref(), &read).await {
                ControlFlow::Break(value) => return Ok(value),
                ControlFlow::Continue(failure) => failure,
            };

            // A non-retriable status over a direct connection will not change on retry
            if !last.is_retriable() && proxy.is_none() {
                break;
            }

            if attempt + 1 < max_retries && !self.backoff(attempt).await {
                return Err(FetchOutcome::Cancelled);
            }
        }

        if self.cancel.is_cancelled() {
            return Err(FetchOutcome::Cancelled);
        }

        if let Some(proxy) = self.pool.select_untried(caller, &tried) {
            tracing::info!("Trying untried proxy for {}", url);
            self.limiter.wait().await;
            last = match self.attempt_and_record(url, Some(&proxy), &read).await {
                ControlFlow::Break(value) => return Ok(value),
                ControlFlow::Continue(failure) => failure,
            };
        }

        if self.pool.has_proxies() && self.pool.is_exhausted() {
            tracing::info!(
                "All {} proxies have failed, using direct connection for {}",
                self.pool.original_count(),
                url
            );
            self.limiter.wait().await;
            last = match self.attempt_and_record(url, None, &read).await {
                ControlFlow::Break(value) => return Ok(value),
                ControlFlow::Continue(failure) => failure,
            };
        }

        tracing::warn!("Failed to fetch {} after {} attempts: {}", url, max_retries, last);
        Err(last)
    }

    /// Sleeps between attempts; returns false if cancelled meanwhile
    async fn backoff(&self, attempt: u32) -> bool {
        let delay = self.retry.backoff(attempt);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Runs one attempt and feeds its outcome to the limiter and the pool
    ///
    /// A success breaks out of the ladder; any failure continues it.
    async fn attempt_and_record<T, F, Fut>(
        &self,
        url: &str,
        proxy: Option<&str>,
        read: &F,
    ) -> ControlFlow<T, FetchOutcome>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, reqwest::Error>>,
    {
        let via = proxy.map(|_| " via proxy").unwrap_or("");

        let outcome = match self.attempt(url, proxy, read).await {
            Attempt::Done(value, elapsed) => {
                self.limiter.adjust(elapsed, StatusCode::OK.as_u16());
                if let Some(p) = proxy {
                    self.pool.record_success(p, Some(elapsed));
                }
                tracing::debug!("Fetched {}{} in {:?}", url, via, elapsed);
                return ControlFlow::Break(value);
            }
            Attempt::Status(status, elapsed) => {
                self.limiter.adjust(elapsed, status);
                if let Some(p) = proxy {
                    self.pool.record_failure(p);
                }
                tracing::warn!("HTTP {} for {}{}", status, url, via);
                FetchOutcome::from_status(status)
            }
            Attempt::Timeout(message) => {
                if let Some(p) = proxy {
                    self.pool.record_failure(p);
                    self.pool.mark_failed(p);
                }
                tracing::warn!("Timeout for {}{}: {}", url, via, message);
                FetchOutcome::Timeout
            }
            Attempt::Transport(kind, message) => {
                if let Some(p) = proxy {
                    self.pool.record_failure(p);
                    if kind.implicates_proxy() {
                        self.pool.mark_failed(p);
                    }
                }
                if kind.implicates_proxy() {
                    tracing::warn!("Transport error for {}{}: {}", url, via, message);
                } else {
                    tracing::error!("Request failed for {}{}: {}", url, via, message);
                }
                FetchOutcome::TransportError {
                    kind,
                    retriable: true,
                }
            }
        };
        ControlFlow::Continue(outcome)
    }

    async fn attempt<T, F, Fut>(&self, url: &str, proxy: Option<&str>, read: &F) -> Attempt<T>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, reqwest::Error>>,
    {
        let client = match self.client_for(proxy) {
            Ok(client) => client,
            Err(e) => return Attempt::Transport(TransportKind::Proxy, e.to_string()),
        };

        let headers = request_headers(self.settings.user_agent.as_deref(), &self.settings.headers);
        let start = Instant::now();

        let response = match client.get(url).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(&e),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Attempt::Status(status.as_u16(), start.elapsed());
        }

        match read(response).await {
            Ok(value) => Attempt::Done(value, start.elapsed()),
            Err(e) => classify_error(&e),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
        let key = proxy.unwrap_or("").to_string();
        let mut clients = lock(&self.clients);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.settings, proxy, self.accept_invalid_certs)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Content address of a URL in the response cache
pub fn cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Full error text including every source in the chain
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn classify_error<T>(error: &reqwest::Error) -> Attempt<T> {
    let message = error_chain(error);
    if error.is_timeout() {
        return Attempt::Timeout(message);
    }

    // The top-level message embeds the URL, which may contain any marker
    let causes = std::error::Error::source(error)
        .map(error_chain)
        .unwrap_or_default();
    let lowered = causes.to_ascii_lowercase();
    let marked = TRANSPORT_ERROR_MARKERS
        .iter()
        .find(|(marker, _)| lowered.contains(marker))
        .map(|(_, kind)| *kind);

    let kind = match marked {
        Some(kind) => kind,
        None if error.is_connect() => TransportKind::Connect,
        None => TransportKind::Other,
    };
    Attempt::Transport(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyConfig, RateLimitConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(proxies: Vec<String>, max_retries: u32) -> FetchClient {
        let crawl = CrawlConfig::new("http://localhost/");
        let proxy_config = ProxyConfig {
            cooldown_secs: 0,
            ..ProxyConfig::default()
        };
        let limiter = RateLimiter::new(&RateLimitConfig {
            initial_delay: 0.0,
            min_delay: 0.0,
            max_delay: 1.0,
        });
        FetchClient::new(
            ClientSettings::from_config(&crawl),
            RetryConfig {
                max_retries,
                backoff_unit_ms: 1,
            },
            Arc::new(ProxyPool::new(proxies, &proxy_config)),
            Arc::new(limiter),
        )
    }

    #[test]
    fn test_cache_key_is_sha256_hex() {
        let key = cache_key("https://example.com/");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, cache_key("https://example.com/other"));
    }

    #[test]
    fn test_outcome_retriable() {
        assert!(FetchOutcome::from_status(429).is_retriable());
        assert!(FetchOutcome::from_status(503).is_retriable());
        assert!(!FetchOutcome::from_status(404).is_retriable());
        assert!(FetchOutcome::Timeout.is_retriable());
        assert!(!FetchOutcome::Cancelled.is_retriable());
    }

    #[test]
    fn test_transport_kind_implicates_proxy() {
        assert!(TransportKind::Connect.implicates_proxy());
        assert!(TransportKind::Proxy.implicates_proxy());
        assert!(!TransportKind::Other.implicates_proxy());
    }

    #[tokio::test]
    async fn test_fetch_success_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>hi</body></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let client = create_test_client(Vec::new(), 3);
        let outcome = client.fetch(&format!("{}/", server.uri()), "w0").await;

        let page = outcome.page().unwrap();
        assert_eq!(page.status, 200);
        assert!(page.text().contains("hi"));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried_directly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_test_client(Vec::new(), 3);
        let outcome = client.fetch(&format!("{}/missing", server.uri()), "w0").await;

        assert!(matches!(
            outcome,
            FetchOutcome::HttpError {
                status: 404,
                retriable: false
            }
        ));
    }

    #[tokio::test]
    async fn test_server_error_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = create_test_client(Vec::new(), 3);
        let outcome = client.fetch(&format!("{}/flaky", server.uri()), "w0").await;

        assert!(matches!(
            outcome,
            FetchOutcome::HttpError {
                status: 503,
                retriable: true
            }
        ));
        // The 5xx multiplier leaves a zero delay at zero
        assert_eq!(client.limiter().delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let cancel = CancellationToken::new();
        let client = create_test_client(Vec::new(), 3).with_cancellation(cancel.clone());
        cancel.cancel();

        let outcome = client.fetch("http://127.0.0.1:1/", "w0").await;
        assert!(matches!(outcome, FetchOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_marker_words_in_url_do_not_classify() {
        let client = create_test_client(Vec::new(), 1);
        let outcome = client
            .fetch("http://127.0.0.1:1/proxy-list/socks-tunnel", "w0")
            .await;
        assert!(matches!(
            outcome,
            FetchOutcome::TransportError {
                kind: TransportKind::Connect,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = create_test_client(Vec::new(), 1);
        let outcome = client.fetch("http://127.0.0.1:1/", "w0").await;
        assert!(matches!(
            outcome,
            FetchOutcome::TransportError { .. } | FetchOutcome::Timeout
        ));
        assert_eq!(client.cached_pages(), 0);
    }
}
