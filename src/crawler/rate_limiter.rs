//! Adaptive request pacing
//!
//! One limiter is shared by every worker of a crawl, so it caps the
//! aggregate request rate against the target rather than per-worker rates.
//! The delay grows on 429/5xx responses and drifts with observed latency.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Number of response times averaged for latency-driven adjustment
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug)]
struct LimiterState {
    /// Current delay in seconds, always within [min_delay, max_delay]
    delay: f64,
    history: VecDeque<f64>,
    /// Start time reserved by the most recent `wait`
    last_request: Option<Instant>,
}

/// Paces requests with a delay adjusted from response times and status codes
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    min_delay: f64,
    max_delay: f64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let min_delay = config.min_delay.max(0.0);
        let max_delay = config.max_delay.max(min_delay);
        Self {
            state: Mutex::new(LimiterState {
                delay: config.initial_delay.clamp(min_delay, max_delay),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                last_request: None,
            }),
            min_delay,
            max_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current delay between request starts
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.lock().delay)
    }

    /// Waits until the caller may start its request
    ///
    /// The next start slot is reserved under the lock and the sleep happens
    /// outside it, so concurrent callers queue up one `delay` apart.
    pub async fn wait(&self) {
        let slot = {
            let mut state = self.lock();
            let now = Instant::now();
            let slot = match state.last_request {
                Some(last) => (last + Duration::from_secs_f64(state.delay)).max(now),
                None => now,
            };
            state.last_request = Some(slot);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }

    /// Feeds one observed response into the delay
    ///
    /// A 429 doubles the delay and a 5xx multiplies it by 1.5. Otherwise,
    /// once the history is full, an average under 0.5s shrinks the delay by
    /// 10% and an average over 2s grows it by 10%.
    pub fn adjust(&self, response_time: Duration, status: u16) {
        let mut state = self.lock();

        if state.history.len() == HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(response_time.as_secs_f64());

        let previous = state.delay;
        if status == 429 {
            state.delay = (state.delay * 2.0).min(self.max_delay);
        } else if status >= 500 {
            state.delay = (state.delay * 1.5).min(self.max_delay);
        } else if state.history.len() == HISTORY_CAPACITY {
            let average = state.history.iter().sum::<f64>() / HISTORY_CAPACITY as f64;
            if average < 0.5 {
                state.delay = (state.delay * 0.9).max(self.min_delay);
            } else if average > 2.0 {
                state.delay = (state.delay * 1.1).min(self.max_delay);
            }
        }

        if state.delay != previous {
            tracing::trace!(
                status,
                "Rate limit delay {:.3}s -> {:.3}s",
                previous,
                state.delay
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(initial: f64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            initial_delay: initial,
            min_delay: 0.1,
            max_delay: 10.0,
        })
    }

    fn secs(limiter: &RateLimiter) -> f64 {
        limiter.delay().as_secs_f64()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_429_doubles_delay() {
        let limiter = limiter(1.0);
        limiter.adjust(Duration::from_millis(100), 429);
        assert!(approx(secs(&limiter), 2.0));
    }

    #[test]
    fn test_429_doubles_regardless_of_history() {
        let limiter = limiter(1.0);
        for _ in 0..9 {
            limiter.adjust(Duration::from_millis(100), 200);
        }
        limiter.adjust(Duration::from_millis(100), 429);
        assert!(approx(secs(&limiter), 2.0));
    }

    #[test]
    fn test_server_error_grows_delay() {
        let limiter = limiter(1.0);
        limiter.adjust(Duration::from_millis(100), 503);
        assert!(approx(secs(&limiter), 1.5));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let limiter = limiter(8.0);
        limiter.adjust(Duration::from_millis(100), 429);
        assert!(approx(secs(&limiter), 10.0));
        limiter.adjust(Duration::from_millis(100), 500);
        assert!(approx(secs(&limiter), 10.0));
    }

    #[test]
    fn test_no_change_until_history_full() {
        let limiter = limiter(1.0);
        for _ in 0..9 {
            limiter.adjust(Duration::from_millis(100), 200);
        }
        assert!(approx(secs(&limiter), 1.0));

        limiter.adjust(Duration::from_millis(100), 200);
        assert!(approx(secs(&limiter), 0.9));
    }

    #[test]
    fn test_fast_responses_never_drop_below_min() {
        let limiter = limiter(0.1);
        for _ in 0..10 {
            limiter.adjust(Duration::from_millis(100), 200);
        }
        assert!(approx(secs(&limiter), 0.1));

        for _ in 0..50 {
            limiter.adjust(Duration::from_millis(100), 200);
        }
        assert!(approx(secs(&limiter), 0.1));
    }

    #[test]
    fn test_slow_responses_grow_delay() {
        let limiter = limiter(1.0);
        for _ in 0..10 {
            limiter.adjust(Duration::from_secs(3), 200);
        }
        assert!(approx(secs(&limiter), 1.1));
    }

    #[test]
    fn test_moderate_responses_leave_delay() {
        let limiter = limiter(1.0);
        for _ in 0..20 {
            limiter.adjust(Duration::from_secs(1), 200);
        }
        assert!(approx(secs(&limiter), 1.0));
    }

    #[test]
    fn test_history_is_bounded() {
        let limiter = limiter(1.0);
        for _ in 0..10 {
            limiter.adjust(Duration::from_secs(3), 200);
        }
        // Ten fast samples push every slow one out of the window
        for _ in 0..10 {
            limiter.adjust(Duration::from_millis(100), 200);
        }
        let after_fast = secs(&limiter);
        limiter.adjust(Duration::from_millis(100), 200);
        assert!(secs(&limiter) < after_fast);
    }

    #[test]
    fn test_initial_delay_clamped() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            initial_delay: 50.0,
            min_delay: 0.1,
            max_delay: 10.0,
        });
        assert!(approx(secs(&limiter), 10.0));
    }

    #[tokio::test]
    async fn test_wait_paces_successive_calls() {
        let limiter = limiter(0.1);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_wait_paces_concurrent_callers() {
        let limiter = std::sync::Arc::new(limiter(0.1));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.wait().await;
                    Instant::now()
                })
            })
            .collect();

        let mut latest = start;
        for handle in handles {
            latest = latest.max(handle.await.unwrap());
        }

        // Four callers occupy slots 0, 100, 200 and 300ms after the first
        assert!(latest - start >= Duration::from_millis(300));
    }
}
