//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the worker pool that drives a crawl, including:
//! - Seeding the frontier and spawning workers
//! - Fetching each URL through the fetch policy
//! - Enqueueing discovered links and dispatching downloads
//! - Idle, stall and cancellation handling
//! - Building the final summary

use crate::config::Config;
use crate::crawler::downloader::{DownloadResult, Downloader, FileDownloader};
use crate::crawler::fetcher::{ClientSettings, FetchClient};
use crate::crawler::frontier::{EnqueueResult, FrontierEntry};
use crate::crawler::parser::HtmlExtractor;
use crate::crawler::policy::{DynamicFetcher, FetchPolicy, PageResult, StaticFetcher};
use crate::crawler::{Frontier, RateLimiter};
use crate::output::{CrawlSummary, StopReason};
use crate::proxy::ProxyPool;
use crate::render::create_renderer;
use crate::state::UrlState;
use crate::url::CrawlScope;
use crate::ConfigError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// State shared by every worker of one crawl
struct Shared {
    config: Config,
    frontier: Frontier,
    client: Arc<FetchClient>,
    policy: FetchPolicy,
    downloader: Arc<dyn Downloader>,
    /// File URLs already handed to the downloader
    discovered: Mutex<HashSet<String>>,
    downloads: Mutex<JoinSet<DownloadResult>>,
    /// Cancelled on external shutdown; aborts fetches and downloads
    cancel: CancellationToken,
    /// Child of `cancel`, also cancelled when an idle crawl stalls; stops workers only
    halt: CancellationToken,
    stalled: AtomicBool,
    /// Workers currently inside their loop
    active_workers: AtomicUsize,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    shared: Arc<Shared>,
    external: CancellationToken,
    threads: usize,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - Validated crawl configuration
    /// * `pool` - Loaded proxy pool; an empty pool means direct connections
    /// * `cancel` - Token that stops the crawl when cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(SiphonError)` - The start URL or domain scope is unusable
    pub fn new(config: Config, pool: Arc<ProxyPool>, cancel: CancellationToken) -> crate::Result<Self> {
        let scope = CrawlScope::from_config(&config.crawl)?;
        let frontier = Frontier::new(scope.clone(), config.crawl.max_depth, config.crawl.max_urls);

        let crawl_cancel = cancel.child_token();
        let halt = crawl_cancel.child_token();

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let client = Arc::new(
            FetchClient::new(
                ClientSettings::from_config(&config.crawl),
                config.retry.clone(),
                pool.clone(),
                limiter,
            )
            .with_cancellation(crawl_cancel.clone()),
        );

        let mode = config.crawl.dynamic;
        let dynamic_fetcher = if mode.uses_renderer() {
            create_renderer(&config.render).map(|renderer| {
                DynamicFetcher::new(
                    renderer,
                    pool,
                    config.crawl.download_extensions.clone(),
                    crawl_cancel.clone(),
                )
            })
        } else {
            None
        };

        let threads = if mode.uses_renderer() && config.crawl.threads > 1 {
            tracing::info!(
                "Dynamic mode '{}' uses a single browser, running 1 worker instead of {}",
                mode,
                config.crawl.threads
            );
            1
        } else {
            config.crawl.threads.max(1)
        };

        let policy = FetchPolicy::new(
            mode,
            StaticFetcher::new(client.clone(), Arc::new(HtmlExtractor)),
            dynamic_fetcher,
            scope,
        );
        let downloader: Arc<dyn Downloader> =
            Arc::new(FileDownloader::new(client.clone(), &config.crawl.output_dir));

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                frontier,
                client,
                policy,
                downloader,
                discovered: Mutex::new(HashSet::new()),
                downloads: Mutex::new(JoinSet::new()),
                cancel: crawl_cancel,
                halt,
                stalled: AtomicBool::new(false),
                active_workers: AtomicUsize::new(0),
            }),
            external: cancel,
            threads,
        })
    }

    /// Replaces the file downloader
    ///
    /// Must be called before [`Coordinator::run`].
    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.downloader = downloader;
        }
        self
    }

    pub fn frontier(&self) -> &Frontier {
        &self.shared.frontier
    }

    pub fn client(&self) -> &Arc<FetchClient> {
        &self.shared.client
    }

    /// Number of workers the crawl will run
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs the crawl to completion
    ///
    /// Returns once the frontier has drained, the crawl stalled, or the
    /// cancellation token fired. Per-URL failures never end the crawl early.
    pub async fn run(&self) -> crate::Result<CrawlSummary> {
        let started = Instant::now();
        let shared = &self.shared;
        let start_url = shared.config.crawl.start_url.clone();

        if let EnqueueResult::Skipped(reason) = shared.frontier.enqueue(&start_url, 0) {
            return Err(ConfigError::Validation(format!(
                "Start URL {} cannot be crawled: {}",
                start_url, reason
            ))
            .into());
        }

        tracing::info!(
            "Starting crawl of {} (domain {}, depth {}, {} workers, dynamic {})",
            start_url,
            shared.frontier.scope().domain(),
            shared.config.crawl.max_depth,
            self.threads,
            shared.policy.mode()
        );

        let monitor_done = CancellationToken::new();
        let monitor = tokio::spawn(monitor(shared.clone(), monitor_done.clone()));

        let mut workers = JoinSet::new();
        for id in 0..self.threads {
            workers.spawn(worker(shared.clone(), format!("worker-{}", id)));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        monitor_done.cancel();
        let _ = monitor.await;

        let (downloaded_files, download_failures) = self.finish_downloads().await;
        shared.policy.shutdown().await;

        let stop_reason = if self.external.is_cancelled() {
            StopReason::Cancelled
        } else if shared.stalled.load(Ordering::SeqCst) {
            StopReason::Stalled
        } else {
            StopReason::Completed
        };

        let stats = shared.frontier.stats();
        let mut discovered_files: Vec<String> = lock(&shared.discovered).iter().cloned().collect();
        discovered_files.sort();

        let summary = CrawlSummary {
            start_url,
            domain: shared.frontier.scope().domain().to_string(),
            stop_reason,
            visited: shared.frontier.visited_urls(),
            scraped: stats.scraped,
            failed: stats.failed,
            skipped: stats.skipped,
            discovered_files,
            downloaded_files,
            download_failures,
            proxies: shared.client.pool().stats(),
            final_delay: shared.client.limiter().delay(),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            "Crawl {}: {} visited, {} files downloaded in {:?}",
            summary.stop_reason,
            summary.visited_count(),
            summary.downloaded_files.len(),
            summary.elapsed
        );

        Ok(summary)
    }

    /// Waits for outstanding downloads, or aborts them when cancelled
    async fn finish_downloads(&self) -> (Vec<std::path::PathBuf>, usize) {
        let mut downloads = std::mem::take(&mut *lock(&self.shared.downloads));
        if self.shared.cancel.is_cancelled() {
            downloads.abort_all();
        } else if !downloads.is_empty() {
            tracing::info!("Waiting for {} downloads to finish", downloads.len());
        }

        let mut saved = Vec::new();
        let mut failures = 0;
        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok(DownloadResult::Saved(path)) => saved.push(path),
                Ok(DownloadResult::Failed(_)) => failures += 1,
                Ok(DownloadResult::Cancelled) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!("Download task failed: {}", e);
                    failures += 1;
                }
            }
        }
        saved.sort();
        (saved, failures)
    }
}

/// Runs a crawl with the given configuration and proxy pool
pub async fn run_crawl(
    config: Config,
    pool: Arc<ProxyPool>,
    cancel: CancellationToken,
) -> crate::Result<CrawlSummary> {
    Coordinator::new(config, pool, cancel)?.run().await
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One worker: dequeue, fetch, fan out links, repeat
///
/// Exits after `max-empty-polls` consecutive empty polls while the frontier
/// is idle, or as soon as the crawl is cancelled.
async fn worker(shared: Arc<Shared>, id: String) {
    let termination = &shared.config.termination;
    let poll_interval = termination.poll_interval();
    let mut empty_polls = 0;

    shared.active_workers.fetch_add(1, Ordering::SeqCst);
    tracing::debug!("{} started", id);

    loop {
        if shared.halt.is_cancelled() {
            break;
        }

        let next = tokio::select! {
            _ = shared.halt.cancelled() => break,
            next = shared.frontier.dequeue_timeout(poll_interval) => next,
        };

        let Some(entry) = next else {
            if shared.frontier.is_idle() {
                empty_polls += 1;
                if empty_polls >= termination.max_empty_polls {
                    tracing::debug!("{} found no work after {} polls", id, empty_polls);
                    break;
                }
            } else {
                empty_polls = 0;
            }
            continue;
        };

        empty_polls = 0;
        process_entry(&shared, &id, entry).await;
    }

    shared.active_workers.fetch_sub(1, Ordering::SeqCst);
    tracing::debug!("{} stopped", id);
}

async fn process_entry(shared: &Arc<Shared>, worker_id: &str, entry: FrontierEntry) {
    tracing::debug!("[{}] Processing {} (depth {})", worker_id, entry.url, entry.depth);

    match shared.policy.fetch(&entry.url, worker_id).await {
        PageResult::Fetched(content) => {
            shared.frontier.finish(&entry.url, UrlState::Scraped);
            tracing::info!(
                "Scraped {} ({}, {} links)",
                entry.url,
                content.strategy,
                content.links.len()
            );

            for link in content.links.iter().chain(content.download_triggers.iter()) {
                handle_link(shared, worker_id, link, entry.depth);
            }
        }
        PageResult::Failed { reason } => {
            shared.frontier.finish(&entry.url, UrlState::Failed);
            tracing::warn!("Failed {}: {}", entry.url, reason);
        }
        PageResult::Cancelled => {
            shared.frontier.finish(&entry.url, UrlState::Failed);
            tracing::debug!("Cancelled while fetching {}", entry.url);
        }
    }
}

/// Routes one discovered link to the file list or the frontier
fn handle_link(shared: &Arc<Shared>, worker_id: &str, link: &Url, depth: u32) {
    let scope = shared.frontier.scope();
    if scope.is_file_target(link) {
        record_file(shared, worker_id, link);
        return;
    }

    if let EnqueueResult::Skipped(reason) = shared.frontier.enqueue(link.as_str(), depth + 1) {
        tracing::trace!("Skipped {}: {}", link, reason);
    }
}

/// Records a file URL once per crawl and hands it to the downloader
///
/// In crawl-only mode the file is only listed.
fn record_file(shared: &Arc<Shared>, worker_id: &str, link: &Url) {
    if !lock(&shared.discovered).insert(link.to_string()) {
        return;
    }
    tracing::info!("Found file {}", link);
    if !shared.frontier.scope().should_download(link) {
        return;
    }

    let downloader = shared.downloader.clone();
    let url = link.clone();
    let caller = worker_id.to_string();
    lock(&shared.downloads).spawn(async move { downloader.download(&url, &caller).await });
}

/// Periodic status line and stall detection
///
/// Only an idle frontier can stall: a slow fetch in flight is left to its
/// own timeouts and never ends the crawl.
async fn monitor(shared: Arc<Shared>, done: CancellationToken) {
    let termination = &shared.config.termination;
    let mut interval = tokio::time::interval(termination.status_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    let mut last_progress = None;
    let mut unchanged_checks = 0;

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = shared.halt.cancelled() => break,
            _ = interval.tick() => {}
        }

        let stats = shared.frontier.stats();
        let discovered = lock(&shared.discovered).len();
        let pool = shared.client.pool().stats();
        tracing::info!(
            "Status: {} visited, {} queued, {} in flight, {} files, {} workers, delay {:.2}s, proxies {}/{}",
            stats.visited(),
            stats.queued,
            stats.in_flight,
            discovered,
            shared.active_workers.load(Ordering::SeqCst),
            shared.client.limiter().delay().as_secs_f64(),
            pool.working,
            pool.total
        );

        let progress = (stats.scraped + stats.failed, stats.queued, discovered);
        if last_progress == Some(progress) && shared.frontier.is_idle() {
            unchanged_checks += 1;
            if unchanged_checks >= termination.stall_checks {
                tracing::warn!(
                    "Frontier idle for {} status checks, stopping workers",
                    unchanged_checks
                );
                shared.stalled.store(true, Ordering::SeqCst);
                shared.halt.cancel();
                shared.frontier.wake_all();
                break;
            }
        } else {
            unchanged_checks = 0;
        }
        last_progress = Some(progress);
    }
}
