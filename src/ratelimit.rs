//! Rate limiter (C6): a token bucket over the global probe rate.

use std::sync::Mutex;
use tokio::time::{Duration, Instant};

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket. Capacity defaults to `rate` (one second of burst).
/// Refill is continuous, not per-tick. Fairness across concurrent
/// acquirers is not required.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(rate: f64) -> Self {
        Self::with_burst(rate, rate)
    }

    pub fn with_burst(rate: f64, burst: f64) -> Self {
        RateLimiter {
            rate,
            capacity: burst,
            state: Mutex::new(State {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Returns immediately if `n` tokens are already available; otherwise
    /// sleeps for exactly the time needed to accumulate the shortfall.
    pub async fn acquire(&self, n: f64) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                self.refill(&mut state);
                if state.tokens >= n {
                    state.tokens -= n;
                    None
                } else {
                    let shortfall = n - state.tokens;
                    Some(Duration::from_secs_f64(shortfall / self.rate))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_immediately_within_burst() {
        let limiter = RateLimiter::new(100.0);
        let start = Instant::now();
        for _ in 0..50 {
            limiter.acquire(1.0).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn waits_once_burst_is_exhausted() {
        let limiter = RateLimiter::with_burst(100.0, 1.0);
        limiter.acquire(1.0).await;
        let start = Instant::now();
        limiter.acquire(1.0).await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
