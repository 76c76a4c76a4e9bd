use std::collections::VecDeque;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Sliding-window admission gate. Callers are delayed until a slot opens,
/// never rejected. `max_requests == 0` disables the gate entirely.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns once the caller may proceed and records the admission.
    /// The lock is released before sleeping so waiters do not serialize
    /// behind each other while the window drains.
    pub async fn wait_for_slot(&self) {
        if self.config.max_requests == 0 {
            return;
        }
        let per = Duration::from_millis(self.config.per_milliseconds);
        let max = self.config.max_requests as usize;

        loop {
            let wake_at = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(oldest) = window.front() {
                    if now.duration_since(*oldest) >= per {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                if window.len() < max {
                    window.push_back(now);
                    return;
                }
                match window.front() {
                    Some(oldest) => *oldest + per,
                    None => now,
                }
            };
            tracing::debug!("rate limit window full, waiting for a slot");
            tokio::time::sleep_until(wake_at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, per_milliseconds: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            per_milliseconds,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_max_without_delay() {
        let gate = limiter(3, 1000);
        let start = Instant::now();
        for _ in 0..3 {
            gate.wait_for_slot().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_the_request_over_the_limit() {
        let gate = limiter(2, 1000);
        let start = Instant::now();
        gate.wait_for_slot().await;
        gate.wait_for_slot().await;
        gate.wait_for_slot().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_rather_than_resetting() {
        let gate = limiter(2, 1000);
        let start = Instant::now();
        gate.wait_for_slot().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        gate.wait_for_slot().await;
        // Full window; the admission from t=0 exits at t=1000, not t=1400.
        gate.wait_for_slot().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_requests_disables_the_gate() {
        let gate = limiter(0, 1000);
        let start = Instant::now();
        for _ in 0..50 {
            gate.wait_for_slot().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
