//! Global request-rate limiter.
//!
//! One limiter is shared by every worker in the run, independent of the
//! connection count. It hands out send slots at `1/rate` second spacing
//! from a single clock, which smooths the aggregate rate without allowing
//! bursts to accumulate while workers are idle.

use std::sync::Mutex;

use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of a non-blocking acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAcquire {
    /// A token was issued; send now.
    Ready,
    /// No token before the given instant; reschedule and retry.
    NotUntil(Instant),
}

/// Leaky-bucket limiter issuing `rate` tokens per second.
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// `rate == 0` builds an unlimited limiter whose operations are no-ops.
    pub fn new(rate: u32) -> Self {
        let interval = (rate > 0).then(|| Duration::from_secs(1) / rate);
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.interval.is_none()
    }

    /// Blocks the calling task until a token is available or the run is
    /// cancelled. Returns `true` when a token was issued.
    ///
    /// Never busy-waits: the caller reserves the next free slot under the
    /// lock and parks on the timer until then.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let Some(interval) = self.interval else {
            return true;
        };

        let at = {
            let mut next = self.next_slot.lock().unwrap();
            let now = Instant::now();
            // Idle time does not bank tokens: the schedule restarts at `now`.
            let at = (*next).max(now);
            *next = at + interval;
            at
        };

        if at <= Instant::now() {
            return true;
        }

        tokio::select! {
            _ = sleep_until(at) => true,
            _ = cancel.cancelled() => false,
        }
    }

    /// Non-blocking acquisition for the event loop: either a token is
    /// issued immediately or the caller learns when to retry. The slot is
    /// not reserved on `NotUntil`, so rescheduled sockets contend fairly.
    pub fn try_acquire(&self) -> TryAcquire {
        let Some(interval) = self.interval else {
            return TryAcquire::Ready;
        };

        let mut next = self.next_slot.lock().unwrap();
        let now = Instant::now();
        if *next <= now {
            *next = now + interval;
            TryAcquire::Ready
        } else {
            TryAcquire::NotUntil(*next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_suspends() {
        let limiter = RateLimiter::new(0);
        let cancel = CancellationToken::new();

        let before = Instant::now();
        for _ in 0..1_000 {
            assert!(limiter.acquire(&cancel).await);
        }
        assert!(before.elapsed() < Duration::from_millis(500));
        assert_eq!(limiter.try_acquire(), TryAcquire::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_tokens() {
        let limiter = RateLimiter::new(10); // one token per 100ms
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.acquire(&cancel).await);
        }
        // First token is immediate, the next four are spaced 100ms apart.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_does_not_bank_tokens() {
        let limiter = RateLimiter::new(10);
        let cancel = CancellationToken::new();

        assert!(limiter.acquire(&cancel).await);
        tokio::time::advance(Duration::from_secs(5)).await;

        // After a long idle stretch only one token is immediately
        // available; the second must wait a full interval.
        let start = Instant::now();
        assert!(limiter.acquire(&cancel).await);
        assert!(limiter.acquire(&cancel).await);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_returns_on_cancellation() {
        let limiter = std::sync::Arc::new(RateLimiter::new(1)); // one token per second
        let cancel = CancellationToken::new();

        assert!(limiter.acquire(&cancel).await);

        let waiter = {
            let cancel = cancel.clone();
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        tokio::time::advance(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_next_slot() {
        let limiter = RateLimiter::new(10);

        assert_eq!(limiter.try_acquire(), TryAcquire::Ready);
        match limiter.try_acquire() {
            TryAcquire::NotUntil(at) => {
                assert!(at > Instant::now());
                tokio::time::sleep_until(at).await;
                assert_eq!(limiter.try_acquire(), TryAcquire::Ready);
            }
            TryAcquire::Ready => panic!("second token should not be immediate"),
        }
    }
}
