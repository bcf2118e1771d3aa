//! Minimum-interval rate limiter for outbound work.

use std::time::Duration;
use tokio::time::Instant;

/// Spaces successive [`acquire`](RateLimiter::acquire) calls at least
/// `interval` apart. A zero interval never waits.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: None,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next slot is available, then reserve the one after.
    pub async fn acquire(&mut self) {
        if self.interval.is_zero() {
            return;
        }
        let now = Instant::now();
        if let Some(slot) = self.next_slot {
            if slot > now {
                tokio::time::sleep_until(slot).await;
            }
        }
        self.next_slot = Some(Instant::now() + self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_spaces_calls() {
        let mut limiter = RateLimiter::from_millis(3000);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let mut limiter = RateLimiter::from_millis(0);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
