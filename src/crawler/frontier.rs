//! Crawl frontier: the URL queue plus the visited-set guard
//!
//! This module handles:
//! - FIFO queueing of (URL, depth) entries
//! - Atomic admission checks (visited, scope, patterns, depth, URL ceiling)
//! - Per-URL state tracking through `UrlState`
//! - Waking idle workers when new work arrives

use crate::state::{SkipReason, UrlState};
use crate::url::{canonicalize, CrawlScope};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A URL waiting to be processed, with the depth it was discovered at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Canonical absolute URL
    pub url: String,

    /// Link distance from the start URL
    pub depth: u32,
}

/// Result of offering a URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued,
    Skipped(SkipReason),
}

impl EnqueueResult {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Point-in-time frontier counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub queued: usize,
    pub in_flight: usize,
    pub scraped: usize,
    pub failed: usize,
    pub skipped: HashMap<SkipReason, usize>,
}

impl FrontierStats {
    /// URLs claimed by a worker so far
    pub fn visited(&self) -> usize {
        self.in_flight + self.scraped + self.failed
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct FrontierState {
    queue: VecDeque<FrontierEntry>,
    /// Every URL the frontier has decided on, keyed by canonical form
    seen: HashMap<String, UrlState>,
    /// URLs admitted to the queue over the whole run
    admitted: usize,
    in_flight: usize,
    scraped: usize,
    failed: usize,
    skipped: HashMap<SkipReason, usize>,
}

impl FrontierState {
    fn skip(&mut self, url: Option<String>, reason: SkipReason) -> EnqueueResult {
        *self.skipped.entry(reason).or_insert(0) += 1;
        if let Some(url) = url {
            if !reason.is_transient() {
                self.seen.insert(url, UrlState::Skipped(reason));
            }
        }
        EnqueueResult::Skipped(reason)
    }
}

/// Thread-safe crawl frontier
///
/// All admission checks and the push happen under one lock, so concurrent
/// workers can never queue the same URL twice.
#[derive(Debug)]
pub struct Frontier {
    state: Mutex<FrontierState>,
    notify: Notify,
    scope: CrawlScope,
    max_depth: u32,
    max_urls: Option<usize>,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `scope` - Domain and pattern rules for admitted URLs
    /// * `max_depth` - Deepest link distance that may be queued
    /// * `max_urls` - Ceiling on URLs admitted over the run, if any
    pub fn new(scope: CrawlScope, max_depth: u32, max_urls: Option<usize>) -> Self {
        Self {
            state: Mutex::new(FrontierState::default()),
            notify: Notify::new(),
            scope,
            max_depth,
            max_urls,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn scope(&self) -> &CrawlScope {
        &self.scope
    }

    /// Offers a URL discovered at `depth`
    ///
    /// The URL is canonicalized first; anything that is not an absolute
    /// http(s) URL counts as out of scope. Rejections other than depth and
    /// URL-limit skips are remembered, so later offers are `AlreadyVisited`.
    pub fn enqueue(&self, url: &str, depth: u32) -> EnqueueResult {
        let canonical = match canonicalize(url) {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::trace!("Not queueing {}: {}", url, e);
                return self.lock().skip(None, SkipReason::OutOfScope);
            }
        };
        let key = canonical.to_string();

        let mut state = self.lock();

        if state.seen.contains_key(&key) {
            return state.skip(None, SkipReason::AlreadyVisited);
        }

        if depth > self.max_depth {
            return state.skip(Some(key), SkipReason::DepthExceeded);
        }

        if let Some(reason) = self.scope.check(&canonical) {
            return state.skip(Some(key), reason);
        }

        if let Some(max) = self.max_urls {
            if state.admitted >= max {
                return state.skip(Some(key), SkipReason::UrlLimit);
            }
        }

        state.seen.insert(key.clone(), UrlState::Queued);
        state.admitted += 1;
        state.queue.push_back(FrontierEntry { url: key, depth });
        drop(state);

        self.notify.notify_one();
        EnqueueResult::Queued
    }

    /// Pops the next entry if one is queued, marking it in flight
    pub fn try_dequeue(&self) -> Option<FrontierEntry> {
        let mut state = self.lock();
        let entry = state.queue.pop_front()?;
        state.seen.insert(entry.url.clone(), UrlState::InFlight);
        state.in_flight += 1;
        Some(entry)
    }

    /// Pops the next entry, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` if the queue stayed empty for the whole timeout, or
    /// early after [`Frontier::wake_all`]. An empty result does not mean the
    /// crawl is done; see [`Frontier::is_idle`].
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<FrontierEntry> {
        let deadline = Instant::now() + timeout;

        // Registered before the queue check so no wakeup slips in between
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(entry) = self.try_dequeue() {
            return Some(entry);
        }

        let _ = tokio::time::timeout_at(deadline, notified).await;
        self.try_dequeue()
    }

    /// Records the final state of an in-flight URL
    ///
    /// `outcome` must be `Scraped` or `Failed`; anything else is ignored.
    pub fn finish(&self, url: &str, outcome: UrlState) {
        let mut state = self.lock();
        let current = state.seen.get(url).copied().unwrap_or(UrlState::Unseen);

        if !current.can_transition_to(outcome) {
            tracing::debug!("Ignoring {} -> {} for {}", current, outcome, url);
            return;
        }

        state.seen.insert(url.to_string(), outcome);
        state.in_flight = state.in_flight.saturating_sub(1);
        match outcome {
            UrlState::Scraped => state.scraped += 1,
            UrlState::Failed => state.failed += 1,
            _ => {}
        }
    }

    /// Current state of a URL, by canonical form
    pub fn state_of(&self, url: &str) -> UrlState {
        let key = match canonicalize(url) {
            Ok(canonical) => canonical.to_string(),
            Err(_) => return UrlState::Unseen,
        };
        self.lock().seen.get(&key).copied().unwrap_or(UrlState::Unseen)
    }

    /// Returns true if nothing is queued and no worker holds a URL
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.in_flight == 0
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn stats(&self) -> FrontierStats {
        let state = self.lock();
        FrontierStats {
            queued: state.queue.len(),
            in_flight: state.in_flight,
            scraped: state.scraped,
            failed: state.failed,
            skipped: state.skipped.clone(),
        }
    }

    /// URLs claimed by a worker, sorted
    pub fn visited_urls(&self) -> Vec<String> {
        let state = self.lock();
        let mut urls: Vec<String> = state
            .seen
            .iter()
            .filter(|(_, s)| s.is_visited())
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    /// Wakes every waiting worker, used on shutdown
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn create_test_frontier(max_depth: u32, max_urls: Option<usize>) -> Frontier {
        let mut config = CrawlConfig::new("https://example.com/");
        config.exclude_urls = vec!["/private".to_string()];
        let scope = CrawlScope::from_config(&config).unwrap();
        Frontier::new(scope, max_depth, max_urls)
    }

    #[test]
    fn test_enqueue_and_dequeue_fifo() {
        let frontier = create_test_frontier(3, None);
        assert!(frontier.enqueue("https://example.com/a", 0).is_queued());
        assert!(frontier.enqueue("https://example.com/b", 1).is_queued());

        let first = frontier.try_dequeue().unwrap();
        assert_eq!(first.url, "https://example.com/a");
        assert_eq!(first.depth, 0);
        assert_eq!(frontier.try_dequeue().unwrap().url, "https://example.com/b");
        assert!(frontier.try_dequeue().is_none());
    }

    #[test]
    fn test_duplicates_and_fragments() {
        let frontier = create_test_frontier(3, None);
        assert!(frontier.enqueue("https://example.com/a", 0).is_queued());
        assert_eq!(
            frontier.enqueue("https://example.com/a#top", 1),
            EnqueueResult::Skipped(SkipReason::AlreadyVisited)
        );

        frontier.try_dequeue();
        frontier.finish("https://example.com/a", UrlState::Scraped);
        assert_eq!(
            frontier.enqueue("https://example.com/a", 1),
            EnqueueResult::Skipped(SkipReason::AlreadyVisited)
        );
    }

    #[test]
    fn test_scope_and_pattern_skips() {
        let frontier = create_test_frontier(3, None);
        assert_eq!(
            frontier.enqueue("https://other.com/", 1),
            EnqueueResult::Skipped(SkipReason::OutOfScope)
        );
        assert_eq!(
            frontier.enqueue("mailto:someone@example.com", 1),
            EnqueueResult::Skipped(SkipReason::OutOfScope)
        );
        assert_eq!(
            frontier.enqueue("https://example.com/private/x", 1),
            EnqueueResult::Skipped(SkipReason::ExcludedPattern)
        );
        assert_eq!(
            frontier.state_of("https://example.com/private/x"),
            UrlState::Skipped(SkipReason::ExcludedPattern)
        );

        let stats = frontier.stats();
        assert_eq!(stats.skipped_for(SkipReason::OutOfScope), 2);
        assert_eq!(stats.skipped_for(SkipReason::ExcludedPattern), 1);
    }

    #[test]
    fn test_depth_bound() {
        let frontier = create_test_frontier(1, None);
        assert!(frontier.enqueue("https://example.com/", 0).is_queued());
        assert!(frontier.enqueue("https://example.com/one", 1).is_queued());
        assert_eq!(
            frontier.enqueue("https://example.com/two", 2),
            EnqueueResult::Skipped(SkipReason::DepthExceeded)
        );

        while let Some(entry) = frontier.try_dequeue() {
            assert!(entry.depth <= 1);
        }
    }

    #[test]
    fn test_depth_skip_is_transient() {
        let frontier = create_test_frontier(1, None);
        frontier.enqueue("https://example.com/deep", 2);
        assert_eq!(frontier.state_of("https://example.com/deep"), UrlState::Unseen);

        // Found again by a shallower path
        assert!(frontier.enqueue("https://example.com/deep", 1).is_queued());
    }

    #[test]
    fn test_url_limit() {
        let frontier = create_test_frontier(3, Some(2));
        assert!(frontier.enqueue("https://example.com/1", 0).is_queued());
        assert!(frontier.enqueue("https://example.com/2", 1).is_queued());
        assert_eq!(
            frontier.enqueue("https://example.com/3", 1),
            EnqueueResult::Skipped(SkipReason::UrlLimit)
        );

        // Dequeuing does not free up admission slots
        frontier.try_dequeue();
        assert_eq!(
            frontier.enqueue("https://example.com/4", 1),
            EnqueueResult::Skipped(SkipReason::UrlLimit)
        );
    }

    #[test]
    fn test_state_transitions_and_idle() {
        let frontier = create_test_frontier(3, None);
        assert!(frontier.is_idle());

        frontier.enqueue("https://example.com/a", 0);
        assert_eq!(frontier.state_of("https://example.com/a"), UrlState::Queued);
        assert!(!frontier.is_idle());

        let entry = frontier.try_dequeue().unwrap();
        assert_eq!(frontier.state_of(&entry.url), UrlState::InFlight);
        assert!(!frontier.is_idle());
        assert_eq!(frontier.stats().visited(), 1);

        frontier.finish(&entry.url, UrlState::Failed);
        assert_eq!(frontier.state_of(&entry.url), UrlState::Failed);
        assert!(frontier.is_idle());

        // A second finish is a no-op
        frontier.finish(&entry.url, UrlState::Scraped);
        let stats = frontier.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.scraped, 0);
        assert_eq!(frontier.visited_urls(), vec!["https://example.com/a"]);
    }

    #[tokio::test]
    async fn test_dequeue_timeout_empty() {
        let frontier = create_test_frontier(3, None);
        let start = Instant::now();
        assert!(frontier
            .dequeue_timeout(Duration::from_millis(50))
            .await
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let frontier = Arc::new(create_test_frontier(3, None));

        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.dequeue_timeout(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        frontier.enqueue("https://example.com/late", 1);

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.url, "https://example.com/late");
    }

    #[tokio::test]
    async fn test_wake_all_releases_waiters() {
        let frontier = Arc::new(create_test_frontier(3, None));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let frontier = frontier.clone();
                tokio::spawn(async move { frontier.dequeue_timeout(Duration::from_secs(10)).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let start = Instant::now();
        frontier.wake_all();

        for waiter in waiters {
            assert!(waiter.await.unwrap().is_none());
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_enqueue_visits_once() {
        let frontier = Arc::new(create_test_frontier(3, None));
        let urls: Vec<String> = (0..50)
            .map(|i| format!("https://example.com/page/{}", i))
            .collect();

        let mut producers = Vec::new();
        for _ in 0..8 {
            let frontier = frontier.clone();
            let urls = urls.clone();
            producers.push(tokio::spawn(async move {
                for url in &urls {
                    frontier.enqueue(url, 1);
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let frontier = frontier.clone();
            consumers.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(entry) = frontier.dequeue_timeout(Duration::from_millis(200)).await {
                    frontier.finish(&entry.url, UrlState::Scraped);
                    claimed.push(entry.url);
                }
                claimed
            }));
        }

        for producer in producers {
            producer.await.unwrap();
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }

        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
        assert_eq!(frontier.stats().scraped, 50);
        assert_eq!(frontier.stats().skipped_for(SkipReason::AlreadyVisited), 350);
    }
}
