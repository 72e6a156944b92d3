use crate::config::ProxyConfig;
use crate::proxy::endpoint::ProxyEndpoint;
use crate::proxy::RotationStrategy;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Score used by the performance strategy for proxies without timing data
const UNKNOWN_PERFORMANCE: f64 = 999.0;

/// Response time assumed by the intelligent strategy before the first success
const UNKNOWN_RESPONSE_TIME: f64 = 5.0;

/// Aggregate proxy health, reported in the crawl summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Proxies still eligible for selection
    pub working: usize,
    /// Proxies excluded for the rest of the run
    pub failed: usize,
    /// Proxies loaded at startup
    pub total: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Every endpoint ever loaded, kept for statistics
    endpoints: HashMap<String, ProxyEndpoint>,
    /// Rotation order; hard-failed proxies are removed from here
    active: Vec<String>,
    /// Sticky for the run, takes precedence over cooldown resets
    failed: HashSet<String>,
    /// Last proxy handed to each caller
    affinities: HashMap<String, String>,
    rr_index: usize,
    exhausted_warned: bool,
    original_count: usize,
}

/// Thread-safe proxy pool with health tracking and pluggable rotation
///
/// All state lives behind one mutex. Pools hold tens to hundreds of proxies
/// and every operation is linear in pool size, so the lock is never held for long
/// and never across an await point.
#[derive(Debug)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
    strategy: RotationStrategy,
    max_failures: u32,
    cooldown: Duration,
}

impl ProxyPool {
    /// Creates a pool from already normalized proxy URLs
    ///
    /// Duplicate entries are collapsed.
    pub fn new(proxies: Vec<String>, config: &ProxyConfig) -> Self {
        let mut state = PoolState::default();
        for url in proxies {
            if state.endpoints.contains_key(&url) {
                continue;
            }
            state.active.push(url.clone());
            state.endpoints.insert(url.clone(), ProxyEndpoint::new(url));
        }
        state.original_count = state.active.len();

        Self {
            state: Mutex::new(state),
            strategy: config.strategy,
            max_failures: config.max_failures.max(1),
            cooldown: config.cooldown(),
        }
    }

    /// Creates a pool with no proxies; every selection yields a direct connection
    pub fn empty(config: &ProxyConfig) -> Self {
        Self::new(Vec::new(), config)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Counters stay consistent even if a holder panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    /// Number of proxies loaded at startup (or kept by the startup probe)
    pub fn original_count(&self) -> usize {
        self.lock().original_count
    }

    /// Returns true if any proxy was configured for this run
    pub fn has_proxies(&self) -> bool {
        self.original_count() > 0
    }

    /// Returns true if proxies were configured and none remains selectable
    pub fn is_exhausted(&self) -> bool {
        let state = self.lock();
        let exhausted = state.original_count > 0 && self.eligible(&state).next().is_none();
        exhausted
    }

    /// Selects a proxy for the given caller
    ///
    /// Excludes failed proxies and those still in cooldown. When cooldown
    /// empties the candidate set, cooldowns are reset; failed proxies stay
    /// excluded. Returns `None` when no proxy is usable, meaning the caller
    /// should connect directly.
    pub fn select(&self, caller: &str) -> Option<String> {
        self.select_excluding(caller, &HashSet::new())
    }

    /// Selects a proxy the caller has not tried yet for the current URL
    pub fn select_untried(&self, caller: &str, tried: &HashSet<String>) -> Option<String> {
        self.select_excluding(caller, tried)
    }

    fn select_excluding(&self, caller: &str, skip: &HashSet<String>) -> Option<String> {
        let mut state = self.lock();
        if state.original_count == 0 {
            return None;
        }

        let now = Instant::now();
        let eligible: Vec<String> = self
            .eligible(&state)
            .filter(|url| !skip.contains(*url))
            .cloned()
            .collect();

        if eligible.is_empty() {
            if skip.is_empty() {
                self.warn_exhausted(&mut state);
            }
            return None;
        }

        let mut candidates: Vec<String> = eligible
            .iter()
            .filter(|url| {
                state
                    .endpoints
                    .get(*url)
                    .map(|e| !e.in_cooldown(now, self.cooldown))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if candidates.is_empty() {
            tracing::debug!("All proxies in cooldown, resetting cooldowns");
            for endpoint in state.endpoints.values_mut() {
                endpoint.last_used = None;
            }
            candidates = eligible;
        }

        let chosen = self.pick(&mut state, &candidates)?;
        if let Some(endpoint) = state.endpoints.get_mut(&chosen) {
            endpoint.last_used = Some(now);
        }
        state.affinities.insert(caller.to_string(), chosen.clone());
        Some(chosen)
    }

    fn eligible<'a>(&self, state: &'a PoolState) -> impl Iterator<Item = &'a String> + 'a {
        let max_failures = self.max_failures;
        state.active.iter().filter(move |url| {
            !state.failed.contains(*url)
                && state
                    .endpoints
                    .get(*url)
                    .map(|e| e.failures < max_failures)
                    .unwrap_or(false)
        })
    }

    fn pick(&self, state: &mut PoolState, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }

        match self.strategy {
            RotationStrategy::RoundRobin => {
                state.rr_index = (state.rr_index + 1) % candidates.len();
                candidates.get(state.rr_index).cloned()
            }
            RotationStrategy::Performance => candidates
                .iter()
                .min_by(|a, b| {
                    let score = |url: &String| {
                        state
                            .endpoints
                            .get(url)
                            .and_then(|e| e.avg_response_time)
                            .unwrap_or(UNKNOWN_PERFORMANCE)
                    };
                    score(a).total_cmp(&score(b))
                })
                .cloned(),
            RotationStrategy::Intelligent => {
                let mut rng = rand::rng();
                candidates
                    .iter()
                    .map(|url| {
                        let endpoint = state.endpoints.get(url);
                        let mut score = endpoint
                            .and_then(|e| e.avg_response_time)
                            .unwrap_or(UNKNOWN_RESPONSE_TIME);
                        if let Some(rate) = endpoint.and_then(|e| e.success_rate()) {
                            score *= 2.0 - rate;
                        }
                        score *= rng.random_range(0.8..1.2);
                        (url, score)
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(url, _)| url.clone())
            }
        }
    }

    fn warn_exhausted(&self, state: &mut PoolState) {
        if !state.exhausted_warned {
            state.exhausted_warned = true;
            tracing::warn!(
                "All {} proxies have failed, switching to direct connection",
                state.original_count
            );
        }
    }

    /// Records a successful request through a proxy
    pub fn record_success(&self, proxy: &str, response_time: Option<Duration>) {
        let mut state = self.lock();
        if let Some(endpoint) = state.endpoints.get_mut(proxy) {
            endpoint.record_success(response_time);
        }
    }

    /// Records a failed request through a proxy
    ///
    /// Once the proxy's total failures reach the limit it is excluded for
    /// the rest of the run, regardless of successes in between.
    pub fn record_failure(&self, proxy: &str) {
        let mut state = self.lock();
        let failures = match state.endpoints.get_mut(proxy) {
            Some(endpoint) => {
                endpoint.record_failure();
                endpoint.failures
            }
            None => return,
        };

        if failures >= self.max_failures && state.failed.insert(proxy.to_string()) {
            tracing::warn!(
                proxy = %redacted(proxy),
                "Proxy excluded after {} failures",
                failures
            );
        }
    }

    /// Removes a proxy from rotation immediately
    ///
    /// Used for transport-level failures. Also drops any caller affinity
    /// pointing at the proxy.
    pub fn mark_failed(&self, proxy: &str) {
        let mut state = self.lock();
        let before = state.active.len();
        state.active.retain(|url| url != proxy);
        if state.active.len() == before {
            return;
        }

        state.failed.insert(proxy.to_string());
        state.affinities.retain(|_, assigned| assigned != proxy);

        let remaining = state.active.len();
        tracing::info!(
            proxy = %redacted(proxy),
            "Proxy failed, {} remaining out of {}",
            remaining,
            state.original_count
        );

        if self.eligible(&state).next().is_none() {
            self.warn_exhausted(&mut state);
        }
    }

    /// Proxy last handed to a caller, if it is still assigned
    pub fn affinity(&self, caller: &str) -> Option<String> {
        self.lock().affinities.get(caller).cloned()
    }

    /// Snapshot of an endpoint's health counters
    pub fn endpoint(&self, proxy: &str) -> Option<ProxyEndpoint> {
        self.lock().endpoints.get(proxy).cloned()
    }

    /// Proxies currently in the rotation list, in order
    pub fn active(&self) -> Vec<String> {
        self.lock().active.clone()
    }

    pub fn stats(&self) -> ProxyStats {
        let state = self.lock();
        let working = self.eligible(&state).count();
        ProxyStats {
            working,
            failed: state.original_count.saturating_sub(working),
            total: state.original_count,
        }
    }

    /// Replaces the rotation with the proxies that passed a startup probe
    ///
    /// Survivors are ordered by latency, their measured latency seeds the
    /// response-time average, and the original count is reset to the survivor count.
    pub fn retain_working(&self, mut working: Vec<(String, Duration)>) {
        working.sort_by(|a, b| a.1.cmp(&b.1));

        let mut state = self.lock();
        let mut endpoints = HashMap::new();
        let mut active = Vec::new();
        for (url, latency) in working {
            if endpoints.contains_key(&url) {
                continue;
            }
            let mut endpoint = ProxyEndpoint::new(url.clone());
            endpoint.avg_response_time = Some(latency.as_secs_f64());
            active.push(url.clone());
            endpoints.insert(url, endpoint);
        }

        state.original_count = active.len();
        state.active = active;
        state.endpoints = endpoints;
        state.failed.clear();
        state.affinities.clear();
        state.rr_index = 0;
        state.exhausted_warned = false;
    }
}

fn redacted(proxy: &str) -> String {
    ProxyEndpoint::new(proxy).display_url()
}
