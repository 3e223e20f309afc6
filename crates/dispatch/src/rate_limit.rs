//! Sliding-window rate limiter, one per business account.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Time source for the limiter. Tests drive a [`ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads tokio's clock, so paused-time tests apply.
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Admits at most `ceiling` acquisitions within any rolling `window`.
///
/// Keeps the timestamps of admitted acquisitions; a timestamp stops counting
/// once it is `window` old. Denied attempts leave no trace.
pub struct SlidingWindowLimiter {
    ceiling: usize,
    window: Duration,
    hits: Mutex<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// `ceiling` acquisitions per rolling second on tokio's clock.
    pub fn per_second(ceiling: u32) -> Self {
        Self::with_clock(ceiling, Duration::from_secs(1), Arc::new(TokioClock))
    }

    pub fn with_clock(ceiling: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let ceiling = ceiling.max(1) as usize;
        Self {
            ceiling,
            window,
            hits: Mutex::new(VecDeque::with_capacity(ceiling)),
            clock,
        }
    }

    /// Records an acquisition and returns true when under the ceiling.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut hits = self.hits.lock();
        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }
        if hits.len() < self.ceiling {
            hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest admitted acquisition leaves the window.
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let hits = self.hits.lock();
        match hits.front() {
            Some(oldest) if hits.len() >= self.ceiling => {
                self.window.saturating_sub(now.saturating_duration_since(*oldest))
            }
            _ => Duration::ZERO,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(ceiling: u32) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = SlidingWindowLimiter::with_clock(ceiling, Duration::from_secs(1), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_burst_admits_exactly_ceiling() {
        let (limiter, _clock) = limiter(80);
        let admitted = (0..200).filter(|_| limiter.try_acquire()).count();
        assert_eq!(admitted, 80);
        assert_eq!(limiter.retry_after(), Duration::from_secs(1));
    }

    #[test]
    fn test_window_rolls_instead_of_resetting() {
        let (limiter, clock) = limiter(10);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        clock.advance(Duration::from_millis(500));
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        // First five expire at t=1.0s, the second five only at t=1.5s.
        clock.advance(Duration::from_millis(500));
        let admitted = (0..10).filter(|_| limiter.try_acquire()).count();
        assert_eq!(admitted, 5);

        clock.advance(Duration::from_millis(499));
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.retry_after(), Duration::from_millis(1));
        clock.advance(Duration::from_millis(1));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_no_rolling_window_exceeds_ceiling() {
        let (limiter, clock) = limiter(7);
        let start = clock.now();
        let mut admitted = Vec::new();
        for _ in 0..1000 {
            if limiter.try_acquire() {
                admitted.push(clock.now().duration_since(start));
            }
            clock.advance(Duration::from_millis(3));
        }
        for (i, at) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|later| **later - *at < Duration::from_secs(1))
                .count();
            assert!(in_window <= 7, "{in_window} acquisitions within 1s of {at:?}");
        }
        assert!(admitted.len() >= 7 * 2);
    }

    #[test]
    fn test_zero_ceiling_is_clamped() {
        let (limiter, _clock) = limiter(0);
        assert_eq!(limiter.ceiling(), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
