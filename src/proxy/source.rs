use crate::config::ProxyConfig;
use crate::proxy::endpoint::normalize_entry;
use crate::proxy::pool::ProxyPool;
use crate::{ConfigError, SiphonError};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::{Duration, Instant};
use url::Url;

const LIST_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_CONCURRENCY: usize = 10;

/// Where a proxy list comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySource {
    /// Proxy entries given directly
    Inline(Vec<String>),
    /// A local file with one proxy per line
    File(String),
    /// A remote newline-delimited list
    Remote(String),
}

impl ProxySource {
    /// Classifies configured sources
    ///
    /// A single entry naming an existing file is read as a list, and a single
    /// http(s) URL with a path beyond `/` is downloaded as a list. Anything
    /// else is a list of literal proxy entries.
    pub fn detect(sources: &[String]) -> Self {
        if let [single] = sources {
            let single = single.trim();
            if Path::new(single).is_file() {
                return Self::File(single.to_string());
            }
            if is_list_url(single) {
                return Self::Remote(single.to_string());
            }
        }
        Self::Inline(sources.to_vec())
    }

    fn describe(&self) -> String {
        match self {
            Self::Inline(entries) => format!("{} inline entries", entries.len()),
            Self::File(path) => path.clone(),
            Self::Remote(url) => url.clone(),
        }
    }

    /// Reads the raw, un-normalized entries from the source
    pub async fn read_entries(&self) -> crate::Result<Vec<String>> {
        match self {
            Self::Inline(entries) => Ok(entries.clone()),
            Self::File(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    SiphonError::ProxySource {
                        source_name: path.clone(),
                        message: e.to_string(),
                    }
                })?;
                Ok(split_lines(&content))
            }
            Self::Remote(url) => {
                let to_error = |e: reqwest::Error| SiphonError::ProxySource {
                    source_name: url.clone(),
                    message: e.to_string(),
                };
                let client = reqwest::Client::builder()
                    .timeout(LIST_DOWNLOAD_TIMEOUT)
                    .build()
                    .map_err(to_error)?;
                let body = client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(to_error)?
                    .text()
                    .await
                    .map_err(to_error)?;
                Ok(split_lines(&body))
            }
        }
    }
}

fn is_list_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https") && !url.path().trim_end_matches('/').is_empty()
        }
        Err(_) => false,
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalizes raw entries, dropping invalid ones with a warning
pub fn parse_entries(raw: &[String]) -> Vec<String> {
    raw.iter()
        .filter_map(|entry| {
            let normalized = normalize_entry(entry);
            if normalized.is_none() && !entry.trim().is_empty() && !entry.trim().starts_with('#') {
                tracing::warn!("Skipping invalid proxy entry: {}", entry.trim());
            }
            normalized
        })
        .collect()
}

/// Builds the crawl's proxy pool from configuration
///
/// An unreadable source yields an empty pool and a single warning, so the
/// crawl runs over direct connections.
///
/// # Errors
///
/// Returns `ConfigError::ProxiesUnavailable` when `required` is set and no
/// proxy could be loaded (or none survived the startup probe).
pub async fn load_pool(config: &ProxyConfig) -> crate::Result<ProxyPool> {
    if config.sources.is_empty() {
        if config.required {
            return Err(ConfigError::ProxiesUnavailable("an empty source list".to_string()).into());
        }
        return Ok(ProxyPool::empty(config));
    }

    let source = ProxySource::detect(&config.sources);
    let raw = match source.read_entries().await {
        Ok(raw) => raw,
        Err(e) => {
            if config.required {
                return Err(ConfigError::ProxiesUnavailable(source.describe()).into());
            }
            tracing::warn!("{}; continuing with direct connections", e);
            Vec::new()
        }
    };

    let pool = ProxyPool::new(parse_entries(&raw), config);
    tracing::info!(
        "Loaded {} proxies from {} ({} strategy)",
        pool.original_count(),
        source.describe(),
        pool.strategy()
    );

    if config.test_on_start && pool.has_proxies() {
        let working = probe(&pool.active(), &config.test_url).await;
        tracing::info!(
            "Proxy probe: {} of {} working",
            working.len(),
            pool.original_count()
        );
        pool.retain_working(working);
    }

    if config.required && !pool.has_proxies() {
        return Err(ConfigError::ProxiesUnavailable(source.describe()).into());
    }

    Ok(pool)
}

/// Probes proxies concurrently against a test URL
///
/// Returns the proxies that answered with HTTP 200, with their latency.
pub async fn probe(proxies: &[String], test_url: &str) -> Vec<(String, Duration)> {
    stream::iter(proxies.iter().cloned())
        .map(|proxy| async move {
            match probe_one(&proxy, test_url).await {
                Some(latency) => {
                    tracing::debug!("Proxy {} responded in {:?}", proxy, latency);
                    Some((proxy, latency))
                }
                None => {
                    tracing::debug!("Proxy {} failed probe", proxy);
                    None
                }
            }
        })
        .buffer_unordered(PROBE_CONCURRENCY)
        .filter_map(|result| async move { result })
        .collect()
        .await
}

async fn probe_one(proxy: &str, test_url: &str) -> Option<Duration> {
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(proxy).ok()?)
        .timeout(PROBE_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .ok()?;

    let start = Instant::now();
    let response = client.get(test_url).send().await.ok()?;
    if response.status() == reqwest::StatusCode::OK {
        Some(start.elapsed())
    } else {
        None
    }
}
